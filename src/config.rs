//! Coordinator configuration

use std::time::Duration;

/// Delay policy between delivery retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBackoff {
    /// Same delay before every retry
    Fixed(Duration),
    /// Doubling delay, capped
    Exponential { base: Duration, cap: Duration },
}

impl RetryBackoff {
    /// Delay before retry attempt `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            RetryBackoff::Fixed(delay) => delay,
            RetryBackoff::Exponential { base, cap } => {
                // Clamp the shift so large attempt counts cannot overflow
                let shift = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << shift).min(cap)
            }
        }
    }
}

/// Configuration surface for a [`Coordinator`](crate::Coordinator)
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Bound on each participant's prepare call; an unanswered prepare
    /// counts as a no vote
    pub prepare_timeout: Duration,

    /// Bound on each commit/rollback delivery call, so that bounded retry
    /// actually guarantees `commit` returns even against a hung participant
    pub delivery_timeout: Duration,

    /// Bound on the whole prepare phase, measured from `begin`
    pub transaction_timeout: Duration,

    /// Delivery retry attempts after the first, per transaction
    pub max_retries: u32,

    /// Delay policy between delivery retries
    pub retry_backoff: RetryBackoff,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let prepare_timeout = Duration::from_secs(5);
        Self {
            prepare_timeout,
            delivery_timeout: prepare_timeout,
            transaction_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: RetryBackoff::Fixed(Duration::from_millis(50)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_is_constant() {
        let backoff = RetryBackoff::Fixed(Duration::from_millis(20));
        assert_eq!(backoff.delay(1), Duration::from_millis(20));
        assert_eq!(backoff.delay(5), Duration::from_millis(20));
    }

    #[test]
    fn exponential_backoff_doubles_up_to_cap() {
        let backoff = RetryBackoff::Exponential {
            base: Duration::from_millis(10),
            cap: Duration::from_millis(50),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(2), Duration::from_millis(20));
        assert_eq!(backoff.delay(3), Duration::from_millis(40));
        assert_eq!(backoff.delay(4), Duration::from_millis(50));
        assert_eq!(backoff.delay(100), Duration::from_millis(50));
    }
}
