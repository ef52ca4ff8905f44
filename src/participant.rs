//! Participant capability contract
//!
//! The coordinator never models participant-internal state; it holds only a
//! handle implementing the three-operation contract below.

use crate::transaction_id::TransactionId;
use async_trait::async_trait;
use thiserror::Error;

/// Error raised by a participant operation
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ParticipantError(String);

impl ParticipantError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result type for participant operations
pub type ParticipantResult<T> = std::result::Result<T, ParticipantError>;

/// A unit of work enlisted in a distributed transaction.
///
/// Contract imposed on implementations:
/// - `commit` and `rollback` must tolerate repeated invocation for the same
///   transaction id with identical observable effect (at-most-once
///   application is the participant's responsibility, not the coordinator's).
/// - A participant may be enlisted in multiple concurrent transactions and
///   must accept concurrent calls for different transaction ids.
#[async_trait]
pub trait Participant: Send + Sync {
    /// Stable name used in logs, phase results, and decision records.
    /// Must be unique among the participants of one transaction.
    fn name(&self) -> &str;

    /// Vote on whether this participant can commit the transaction.
    /// Voting yes may tentatively reserve resources; voting no must be
    /// side-effect-free.
    async fn prepare(&self, txn: TransactionId) -> ParticipantResult<bool>;

    /// Finalize this participant's contribution to the transaction
    async fn commit(&self, txn: TransactionId) -> ParticipantResult<()>;

    /// Discard this participant's contribution, including any reservation
    /// made by a prepare whose response the coordinator never saw
    async fn rollback(&self, txn: TransactionId) -> ParticipantResult<()>;
}
