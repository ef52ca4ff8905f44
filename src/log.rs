//! Durable decision log consumed by the coordinator
//!
//! The coordinator appends each transaction's decision here before starting
//! delivery; recovery replays whatever was appended but never marked
//! complete. Durability itself is the implementation's concern — this crate
//! ships only the in-memory reference implementation.

use crate::participant::Participant;
use crate::transaction::Decision;
use crate::transaction_id::TransactionId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error raised by a transaction log operation
#[derive(Debug, Clone, Error)]
#[error("transaction log error: {0}")]
pub struct LogError(String);

impl LogError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result type for transaction log operations
pub type LogResult<T> = std::result::Result<T, LogError>;

/// One logged decision point
#[derive(Clone)]
pub struct DecisionRecord {
    pub txn: TransactionId,
    pub decision: Decision,
    /// Handles the decision must be delivered to. How these survive a
    /// process restart (names, endpoints, rehydration) is the log
    /// implementation's concern.
    pub participants: Vec<Arc<dyn Participant>>,
}

impl fmt::Debug for DecisionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionRecord")
            .field("txn", &self.txn)
            .field("decision", &self.decision)
            .field(
                "participants",
                &self
                    .participants
                    .iter()
                    .map(|p| p.name().to_string())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Append-only record of decision points.
///
/// `append` must be durable before it returns; the coordinator starts
/// delivery only after a successful append. Re-appending a record for a
/// transaction already logged with the same decision must be idempotent
/// (the coordinator resumes interrupted drives); a conflicting decision for
/// the same id is an implementation error.
pub trait TransactionLog: Send + Sync {
    /// Durably record a decision point
    fn append(&self, record: DecisionRecord) -> LogResult<()>;

    /// Decisions whose delivery never finished, in append order
    fn pending_decisions(&self) -> LogResult<Vec<DecisionRecord>>;

    /// Mark a decision fully delivered so recovery skips it
    fn mark_complete(&self, txn: TransactionId) -> LogResult<()>;
}

/// In-memory transaction log.
///
/// Suitable for tests and for embedded deployments that accept losing
/// decisions on process exit; decisions survive coordinator restarts only as
/// long as the log value itself is kept alive.
#[derive(Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<Entry>>,
}

struct Entry {
    record: DecisionRecord,
    complete: bool,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completion flag for a logged transaction, if present
    pub fn is_complete(&self, txn: TransactionId) -> Option<bool> {
        self.entries
            .lock()
            .iter()
            .find(|entry| entry.record.txn == txn)
            .map(|entry| entry.complete)
    }
}

impl TransactionLog for MemoryLog {
    fn append(&self, record: DecisionRecord) -> LogResult<()> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.iter().find(|entry| entry.record.txn == record.txn) {
            if existing.record.decision != record.decision {
                return Err(LogError::new(format!(
                    "conflicting decision for {}: {} already logged, {} appended",
                    record.txn, existing.record.decision, record.decision
                )));
            }
            // Resumed drive restating the same decision
            return Ok(());
        }
        entries.push(Entry {
            record,
            complete: false,
        });
        Ok(())
    }

    fn pending_decisions(&self) -> LogResult<Vec<DecisionRecord>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|entry| !entry.complete)
            .map(|entry| entry.record.clone())
            .collect())
    }

    fn mark_complete(&self, txn: TransactionId) -> LogResult<()> {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|entry| entry.record.txn == txn) {
            Some(entry) => {
                entry.complete = true;
                Ok(())
            }
            None => Err(LogError::new(format!("no logged decision for {}", txn))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(decision: Decision) -> DecisionRecord {
        DecisionRecord {
            txn: TransactionId::new(),
            decision,
            participants: Vec::new(),
        }
    }

    #[test]
    fn append_then_complete_clears_pending() {
        let log = MemoryLog::new();
        let rec = record(Decision::Commit);
        let txn = rec.txn;

        log.append(rec).unwrap();
        assert_eq!(log.pending_decisions().unwrap().len(), 1);
        assert_eq!(log.is_complete(txn), Some(false));

        log.mark_complete(txn).unwrap();
        assert!(log.pending_decisions().unwrap().is_empty());
        assert_eq!(log.is_complete(txn), Some(true));
    }

    #[test]
    fn reappend_same_decision_is_idempotent() {
        let log = MemoryLog::new();
        let rec = record(Decision::Abort);

        log.append(rec.clone()).unwrap();
        log.append(rec).unwrap();
        assert_eq!(log.pending_decisions().unwrap().len(), 1);
    }

    #[test]
    fn conflicting_decision_is_rejected() {
        let log = MemoryLog::new();
        let rec = record(Decision::Commit);
        let mut conflicting = rec.clone();
        conflicting.decision = Decision::Abort;

        log.append(rec).unwrap();
        assert!(log.append(conflicting).is_err());
    }

    #[test]
    fn completing_unknown_transaction_fails() {
        let log = MemoryLog::new();
        assert!(log.mark_complete(TransactionId::new()).is_err());
    }
}
