//! Transaction records and the 2PC state machine

use crate::participant::Participant;
use crate::transaction_id::TransactionId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex as AsyncMutex;

/// The coordinator's irrevocable outcome for one transaction.
///
/// Recording this value in the transaction log is the single point of no
/// return; it is written exactly once and never altered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Commit,
    Abort,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Commit => write!(f, "commit"),
            Decision::Abort => write!(f, "abort"),
        }
    }
}

/// Transaction state in the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Accepting enlistments; no protocol activity yet
    Pending,
    /// Prepare phase in flight
    Preparing,
    /// Every participant voted yes; commit decision not yet durable
    Prepared,
    /// Commit decision durable; delivery in progress
    Committing,
    /// Every participant acknowledged commit
    Committed,
    /// Abort chosen; abort decision not yet durable
    Aborted,
    /// Abort decision durable; rollback delivery in progress
    RollingBack,
    /// Every participant acknowledged rollback
    RolledBack,
}

impl TransactionStatus {
    /// Terminal states admit no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed | TransactionStatus::RolledBack
        )
    }

    /// Whether `next` is a legal forward transition from `self`.
    ///
    /// Status only moves forward; the delivery states (`Committing`,
    /// `RollingBack`) are resumed rather than re-entered, so they do not
    /// appear as their own targets here.
    pub fn can_advance(self, next: Self) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Preparing)
                | (Pending, Aborted)
                | (Preparing, Prepared)
                | (Preparing, Aborted)
                | (Prepared, Committing)
                | (Prepared, Aborted)
                | (Committing, Committed)
                | (Aborted, RollingBack)
                | (RollingBack, RolledBack)
        )
    }
}

/// Mutable portion of a transaction record, guarded by the record's own lock
pub(crate) struct RecordState {
    pub status: TransactionStatus,
    /// Set exactly once, when the decision has been durably appended to the
    /// transaction log
    pub decision: Option<Decision>,
    /// Enlisted participants in registration order
    pub participants: Vec<Arc<dyn Participant>>,
}

/// One transaction owned by the coordinator.
///
/// Records are never shared between transactions; each carries its own locks
/// so unrelated transactions never serialize on shared state.
pub(crate) struct TransactionRecord {
    pub id: TransactionId,
    pub created_at: SystemTime,
    /// Wall-clock bound on the prepare phase
    pub deadline: SystemTime,
    pub state: Mutex<RecordState>,
    /// Serializes protocol drives (commit, rollback, resumption) for this id
    pub driver: AsyncMutex<()>,
}

impl TransactionRecord {
    pub fn new(id: TransactionId, transaction_timeout: Duration) -> Self {
        let created_at = SystemTime::now();
        Self {
            id,
            created_at,
            deadline: created_at + transaction_timeout,
            state: Mutex::new(RecordState {
                status: TransactionStatus::Pending,
                decision: None,
                participants: Vec::new(),
            }),
            driver: AsyncMutex::new(()),
        }
    }

    pub fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    /// Snapshot of the enlisted participants
    pub fn participants(&self) -> Vec<Arc<dyn Participant>> {
        self.state.lock().participants.clone()
    }

    /// Move the state machine forward
    pub fn advance(&self, next: TransactionStatus) {
        let mut state = self.state.lock();
        debug_assert!(
            state.status.can_advance(next),
            "invalid transition {:?} -> {:?}",
            state.status,
            next
        );
        tracing::debug!(txn = %self.id, from = ?state.status, to = ?next, "state transition");
        state.status = next;
    }

    /// Record the durable decision. Write-once: a second call may only
    /// restate the same value (delivery resumption).
    pub fn record_decision(&self, decision: Decision) {
        let mut state = self.state.lock();
        debug_assert!(
            state.decision.is_none() || state.decision == Some(decision),
            "decision for {} already recorded as {:?}",
            self.id,
            state.decision
        );
        state.decision = Some(decision);
    }

    /// Per-call prepare budget: the configured timeout clipped to whatever
    /// remains of the transaction deadline. `None` once the deadline passed.
    pub fn prepare_budget(&self, per_call: Duration) -> Option<Duration> {
        let remaining = self.deadline.duration_since(SystemTime::now()).ok()?;
        Some(per_call.min(remaining))
    }
}
