//! Concurrent phase execution against enlisted participants
//!
//! One task per participant call, each bounded by its own timeout. A
//! participant's error, hang, or panic is absorbed into its own slot of the
//! phase result and never disturbs a sibling's outcome.

use crate::config::CoordinatorConfig;
use crate::participant::Participant;
use crate::transaction_id::TransactionId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Operation a phase dispatches to every participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOp {
    Prepare,
    Commit,
    Rollback,
}

impl fmt::Display for PhaseOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseOp::Prepare => write!(f, "prepare"),
            PhaseOp::Commit => write!(f, "commit"),
            PhaseOp::Rollback => write!(f, "rollback"),
        }
    }
}

/// Per-participant outcomes of one phase attempt, keyed by participant name
#[derive(Debug, Clone, Default)]
pub struct PhaseResult {
    pub succeeded: Vec<String>,
    /// Explicit no votes, errors, and panics
    pub failed: Vec<String>,
    /// Calls with no response within the timeout, including prepares
    /// abandoned once another participant voted no
    pub timed_out: Vec<String>,
}

impl PhaseResult {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }

    /// Participants that have not acknowledged the operation
    pub fn undelivered(&self) -> Vec<String> {
        self.failed
            .iter()
            .chain(self.timed_out.iter())
            .cloned()
            .collect()
    }
}

enum CallOutcome {
    Acknowledged,
    VotedNo,
    Failed,
    TimedOut,
}

/// Runs a fixed operation against a set of participants concurrently and
/// reduces the individual outcomes into a [`PhaseResult`]
pub(crate) struct PhaseExecutor {
    config: CoordinatorConfig,
}

impl PhaseExecutor {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    /// Run one attempt of `op` against every participant concurrently, each
    /// call bounded by `timeout`.
    ///
    /// For `Prepare` the executor stops waiting at the first non-yes
    /// outcome; participants still in flight are classified as timed out,
    /// since their unanswered prepare may have reserved resources and the
    /// caller must still roll them back.
    pub async fn run_phase(
        &self,
        op: PhaseOp,
        participants: &[Arc<dyn Participant>],
        txn: TransactionId,
        timeout: Duration,
    ) -> PhaseResult {
        let mut result = PhaseResult::default();
        if participants.is_empty() {
            return result;
        }

        let mut names: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut tasks = JoinSet::new();
        for participant in participants {
            let participant = participant.clone();
            let handle = tasks.spawn(Self::call_participant(op, participant.clone(), txn, timeout));
            names.insert(handle.id(), participant.name().to_string());
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (name, outcome) = match joined {
                Ok((task_id, outcome)) => {
                    let name = names
                        .remove(&task_id)
                        .unwrap_or_else(|| "unknown".to_string());
                    (name, outcome)
                }
                Err(join_error) => {
                    // Participant panicked; only its own slot fails
                    let name = names
                        .remove(&join_error.id())
                        .unwrap_or_else(|| "unknown".to_string());
                    tracing::warn!(%txn, phase = %op, participant = %name, "participant call panicked");
                    (name, CallOutcome::Failed)
                }
            };

            let acknowledged = matches!(outcome, CallOutcome::Acknowledged);
            match outcome {
                CallOutcome::Acknowledged => result.succeeded.push(name),
                CallOutcome::VotedNo | CallOutcome::Failed => result.failed.push(name),
                CallOutcome::TimedOut => result.timed_out.push(name),
            }

            if op == PhaseOp::Prepare && !acknowledged {
                // One no vote decides the phase; stop waiting for the rest
                tasks.abort_all();
                result.timed_out.extend(std::mem::take(&mut names).into_values());
                break;
            }
        }

        result
    }

    async fn call_participant(
        op: PhaseOp,
        participant: Arc<dyn Participant>,
        txn: TransactionId,
        timeout: Duration,
    ) -> CallOutcome {
        let call = async {
            match op {
                PhaseOp::Prepare => match participant.prepare(txn).await {
                    Ok(true) => CallOutcome::Acknowledged,
                    Ok(false) => {
                        tracing::debug!(%txn, participant = participant.name(), "voted no");
                        CallOutcome::VotedNo
                    }
                    Err(error) => {
                        tracing::debug!(%txn, participant = participant.name(), %error, "prepare failed");
                        CallOutcome::Failed
                    }
                },
                PhaseOp::Commit => match participant.commit(txn).await {
                    Ok(()) => CallOutcome::Acknowledged,
                    Err(error) => {
                        tracing::debug!(%txn, participant = participant.name(), %error, "commit failed");
                        CallOutcome::Failed
                    }
                },
                PhaseOp::Rollback => match participant.rollback(txn).await {
                    Ok(()) => CallOutcome::Acknowledged,
                    Err(error) => {
                        tracing::debug!(%txn, participant = participant.name(), %error, "rollback failed");
                        CallOutcome::Failed
                    }
                },
            }
        };

        match tokio::time::timeout(timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => CallOutcome::TimedOut,
        }
    }

    /// Deliver `op` until every participant acknowledges or the retry budget
    /// is exhausted. Only the unacknowledged residue is re-attempted, so a
    /// participant that succeeds once is never called again.
    pub async fn deliver_with_retry(
        &self,
        op: PhaseOp,
        participants: &[Arc<dyn Participant>],
        txn: TransactionId,
    ) -> PhaseResult {
        debug_assert!(op != PhaseOp::Prepare, "prepare is never retried");

        let mut delivered: Vec<String> = Vec::new();
        let mut pending: Vec<Arc<dyn Participant>> = participants.to_vec();
        let mut last = PhaseResult::default();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.config.retry_backoff.delay(attempt);
                tracing::warn!(
                    %txn,
                    phase = %op,
                    attempt,
                    remaining = pending.len(),
                    delay_ms = delay.as_millis() as u64,
                    "retrying delivery"
                );
                tokio::time::sleep(delay).await;
            }

            last = self
                .run_phase(op, &pending, txn, self.config.delivery_timeout)
                .await;
            delivered.extend(last.succeeded.iter().cloned());

            if last.failed.is_empty() && last.timed_out.is_empty() {
                break;
            }
            pending.retain(|participant| {
                let name = participant.name();
                last.failed.iter().any(|f| f == name) || last.timed_out.iter().any(|t| t == name)
            });
        }

        PhaseResult {
            succeeded: delivered,
            failed: last.failed,
            timed_out: last.timed_out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryBackoff;
    use crate::participant::{ParticipantError, ParticipantResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedParticipant {
        name: String,
        vote: bool,
        delay: Option<Duration>,
        commit_failures: AtomicU32,
        commit_calls: AtomicU32,
    }

    impl ScriptedParticipant {
        fn voting(name: &str, vote: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                vote,
                delay: None,
                commit_failures: AtomicU32::new(0),
                commit_calls: AtomicU32::new(0),
            })
        }

        fn slow(name: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                vote: true,
                delay: Some(delay),
                commit_failures: AtomicU32::new(0),
                commit_calls: AtomicU32::new(0),
            })
        }

        fn flaky(name: &str, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                vote: true,
                delay: None,
                commit_failures: AtomicU32::new(failures),
                commit_calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Participant for ScriptedParticipant {
        fn name(&self) -> &str {
            &self.name
        }

        async fn prepare(&self, _txn: TransactionId) -> ParticipantResult<bool> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.vote)
        }

        async fn commit(&self, _txn: TransactionId) -> ParticipantResult<()> {
            self.commit_calls.fetch_add(1, Ordering::SeqCst);
            if self.commit_failures.load(Ordering::SeqCst) > 0 {
                self.commit_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ParticipantError::new("commit unavailable"));
            }
            Ok(())
        }

        async fn rollback(&self, _txn: TransactionId) -> ParticipantResult<()> {
            Ok(())
        }
    }

    fn executor(max_retries: u32) -> PhaseExecutor {
        PhaseExecutor::new(CoordinatorConfig {
            prepare_timeout: Duration::from_millis(100),
            delivery_timeout: Duration::from_millis(100),
            transaction_timeout: Duration::from_secs(5),
            max_retries,
            retry_backoff: RetryBackoff::Fixed(Duration::from_millis(1)),
        })
    }

    #[tokio::test]
    async fn unanimous_yes_vote() {
        let participants: Vec<Arc<dyn Participant>> = vec![
            ScriptedParticipant::voting("a", true),
            ScriptedParticipant::voting("b", true),
        ];
        let result = executor(0)
            .run_phase(
                PhaseOp::Prepare,
                &participants,
                TransactionId::new(),
                Duration::from_millis(100),
            )
            .await;
        assert!(result.all_succeeded());
        assert_eq!(result.succeeded.len(), 2);
    }

    #[tokio::test]
    async fn slow_prepare_is_classified_as_timeout() {
        let participants: Vec<Arc<dyn Participant>> = vec![
            ScriptedParticipant::voting("fast", true),
            ScriptedParticipant::slow("slow", Duration::from_secs(60)),
        ];
        let result = executor(0)
            .run_phase(
                PhaseOp::Prepare,
                &participants,
                TransactionId::new(),
                Duration::from_millis(20),
            )
            .await;
        assert_eq!(result.succeeded, vec!["fast".to_string()]);
        assert_eq!(result.timed_out, vec!["slow".to_string()]);
    }

    #[tokio::test]
    async fn no_vote_stops_the_wait_for_slow_siblings() {
        let participants: Vec<Arc<dyn Participant>> = vec![
            ScriptedParticipant::voting("veto", false),
            ScriptedParticipant::slow("slow", Duration::from_secs(60)),
        ];
        let start = tokio::time::Instant::now();
        let result = executor(0)
            .run_phase(
                PhaseOp::Prepare,
                &participants,
                TransactionId::new(),
                Duration::from_secs(30),
            )
            .await;
        // Returned well before either the per-call timeout or the sleep
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(result.failed.contains(&"veto".to_string()));
        assert!(result.timed_out.contains(&"slow".to_string()));
    }

    #[tokio::test]
    async fn delivery_retries_only_the_residue() {
        let flaky = ScriptedParticipant::flaky("flaky", 2);
        let steady = ScriptedParticipant::voting("steady", true);
        let participants: Vec<Arc<dyn Participant>> = vec![flaky.clone(), steady.clone()];

        let result = executor(3)
            .deliver_with_retry(PhaseOp::Commit, &participants, TransactionId::new())
            .await;
        assert!(result.all_succeeded());
        assert_eq!(flaky.commit_calls.load(Ordering::SeqCst), 3);
        assert_eq!(steady.commit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delivery_gives_up_after_retry_budget() {
        let broken = ScriptedParticipant::flaky("broken", u32::MAX);
        let participants: Vec<Arc<dyn Participant>> = vec![broken.clone()];

        let result = executor(2)
            .deliver_with_retry(PhaseOp::Commit, &participants, TransactionId::new())
            .await;
        assert!(!result.all_succeeded());
        assert_eq!(result.undelivered(), vec!["broken".to_string()]);
        // First attempt plus two retries
        assert_eq!(broken.commit_calls.load(Ordering::SeqCst), 3);
    }
}
