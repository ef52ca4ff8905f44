//! Error types for the coordinator

use crate::log::LogError;
use crate::transaction_id::TransactionId;
use thiserror::Error;

/// Coordinator error types.
///
/// Failures local to a single participant never appear here; they are
/// absorbed into phase results and drive protocol decisions. Only structural
/// misuse and log failures propagate to the caller.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("transaction not found: {0}")]
    UnknownTransaction(TransactionId),

    #[error("invalid transaction state: {0}")]
    InvalidState(String),

    /// The log append for the decision point failed; delivery was not
    /// attempted because committing without a durable decision cannot be
    /// recovered from
    #[error("decision for transaction {txn} could not be recorded")]
    UnrecordedDecision {
        txn: TransactionId,
        #[source]
        source: LogError,
    },

    /// The transaction log could not be read during recovery
    #[error("transaction log unavailable")]
    LogUnavailable(#[source] LogError),
}

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
