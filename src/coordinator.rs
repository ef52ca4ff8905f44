//! Core coordinator implementation

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::executor::{PhaseExecutor, PhaseOp};
use crate::log::{DecisionRecord, TransactionLog};
use crate::participant::Participant;
use crate::transaction::{Decision, TransactionRecord, TransactionStatus};
use crate::transaction_id::TransactionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A delivery that exhausted its retry budget.
///
/// The transaction stays in `Committing`/`RollingBack` until an operator or
/// a later `commit`/`recover` call resumes delivery; marking it terminal
/// would falsely claim every participant was told the outcome.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub txn: TransactionId,
    pub decision: Decision,
    /// Names of participants that never acknowledged the decision
    pub undelivered: Vec<String>,
}

/// Distributed transaction coordinator.
///
/// Owns the registry of active transactions, drives each through the
/// two-phase-commit state machine, applies the retry policy, and replays
/// logged decisions on startup via [`recover`](Coordinator::recover).
pub struct Coordinator {
    config: CoordinatorConfig,

    /// Durable record of decision points, injected by the caller
    log: Arc<dyn TransactionLog>,

    /// Runs prepare/commit/rollback phases against participants
    executor: PhaseExecutor,

    /// Active transactions. The map lock covers lookups and insertions
    /// only; each record carries its own locks, so unrelated transactions
    /// never serialize on it.
    transactions: Mutex<HashMap<TransactionId, Arc<TransactionRecord>>>,

    /// Deliveries that exhausted retries, awaiting operator attention
    delivery_failures: Mutex<Vec<DeliveryFailure>>,
}

impl Coordinator {
    /// Create a coordinator with an injected transaction log and configuration
    pub fn new(log: Arc<dyn TransactionLog>, config: CoordinatorConfig) -> Self {
        Self {
            executor: PhaseExecutor::new(config.clone()),
            config,
            log,
            transactions: Mutex::new(HashMap::new()),
            delivery_failures: Mutex::new(Vec::new()),
        }
    }

    /// Begin a new transaction in state `Pending`. No I/O
    pub fn begin(&self) -> TransactionId {
        let record = Arc::new(TransactionRecord::new(
            TransactionId::new(),
            self.config.transaction_timeout,
        ));
        let id = record.id;
        self.transactions.lock().insert(id, record);
        tracing::debug!(txn = %id, "transaction started");
        id
    }

    /// Enlist a participant in a `Pending` transaction.
    ///
    /// Rejected once the transaction has entered `Preparing` or later, to
    /// avoid races between prepare dispatch and registration.
    pub fn enlist(&self, txn: TransactionId, participant: Arc<dyn Participant>) -> Result<()> {
        let record = self.lookup(txn)?;
        let mut state = record.state.lock();
        if state.status != TransactionStatus::Pending {
            return Err(CoordinatorError::InvalidState(format!(
                "cannot enlist {} in transaction {} in state {:?}",
                participant.name(),
                txn,
                state.status
            )));
        }
        tracing::debug!(%txn, participant = participant.name(), "participant enlisted");
        state.participants.push(participant);
        Ok(())
    }

    /// Current status of a transaction
    pub fn status(&self, txn: TransactionId) -> Result<TransactionStatus> {
        self.lookup(txn).map(|record| record.status())
    }

    /// Drive the transaction through two-phase commit; returns `true` iff
    /// the final decision was commit.
    ///
    /// Idempotent: on a transaction that already reached a terminal state
    /// this returns the recorded outcome without touching participants. On a
    /// transaction stuck past its decision point (log-append failure or
    /// exhausted delivery) it resumes from the decision point; prepare is
    /// never re-run once a decision exists.
    pub async fn commit(&self, txn: TransactionId) -> Result<bool> {
        let record = self.lookup(txn)?;
        let _drive = record.driver.lock().await;

        match record.status() {
            TransactionStatus::Committed => Ok(true),
            TransactionStatus::RolledBack => Ok(false),
            TransactionStatus::Pending => self.drive_commit(&record).await,
            TransactionStatus::Preparing => {
                // Only reachable when a previous drive was cancelled
                // mid-prepare; the votes are unknown, so resolve
                // conservatively by aborting.
                record.advance(TransactionStatus::Aborted);
                self.decide(&record, Decision::Abort).await
            }
            TransactionStatus::Prepared => self.decide(&record, Decision::Commit).await,
            TransactionStatus::Aborted => self.decide(&record, Decision::Abort).await,
            TransactionStatus::Committing => {
                self.finish_delivery(&record, Decision::Commit).await;
                Ok(true)
            }
            TransactionStatus::RollingBack => {
                self.finish_delivery(&record, Decision::Abort).await;
                Ok(false)
            }
        }
    }

    /// Explicitly abort a transaction before `commit` decides otherwise.
    ///
    /// No-op once terminal, and once a commit decision is durable the
    /// transaction can no longer be aborted.
    pub async fn rollback(&self, txn: TransactionId) -> Result<()> {
        let record = self.lookup(txn)?;
        let _drive = record.driver.lock().await;

        match record.status() {
            TransactionStatus::Committed | TransactionStatus::RolledBack => Ok(()),
            TransactionStatus::Committing => {
                tracing::debug!(%txn, "rollback ignored: commit decision already durable");
                Ok(())
            }
            TransactionStatus::Pending
            | TransactionStatus::Preparing
            | TransactionStatus::Prepared => {
                record.advance(TransactionStatus::Aborted);
                self.decide(&record, Decision::Abort).await.map(|_| ())
            }
            TransactionStatus::Aborted => self.decide(&record, Decision::Abort).await.map(|_| ()),
            TransactionStatus::RollingBack => {
                self.finish_delivery(&record, Decision::Abort).await;
                Ok(())
            }
        }
    }

    /// Replay logged decisions whose delivery never finished.
    ///
    /// Delivery only: the decision was already durable, so prepare is never
    /// re-run. Entries that still cannot be fully delivered stay pending for
    /// the next `recover` call and are reported as [`DeliveryFailure`]s.
    pub async fn recover(&self) -> Result<()> {
        let pending = self
            .log
            .pending_decisions()
            .map_err(CoordinatorError::LogUnavailable)?;

        for entry in pending {
            tracing::info!(
                txn = %entry.txn,
                decision = %entry.decision,
                participants = entry.participants.len(),
                "replaying logged decision"
            );
            self.deliver_decision(entry.txn, entry.decision, &entry.participants)
                .await;
        }
        Ok(())
    }

    /// Drain the accumulated delivery-failure reports
    pub fn take_delivery_failures(&self) -> Vec<DeliveryFailure> {
        std::mem::take(&mut self.delivery_failures.lock())
    }

    /// Drop terminal records from the registry; returns how many were removed.
    ///
    /// Terminal records are kept around so repeated `commit`/`rollback`
    /// calls can answer from recorded state; callers decide when that
    /// history is no longer needed.
    pub fn purge_terminal(&self) -> usize {
        let mut transactions = self.transactions.lock();
        let before = transactions.len();
        transactions.retain(|_, record| !record.status().is_terminal());
        before - transactions.len()
    }

    fn lookup(&self, txn: TransactionId) -> Result<Arc<TransactionRecord>> {
        self.transactions
            .lock()
            .get(&txn)
            .cloned()
            .ok_or(CoordinatorError::UnknownTransaction(txn))
    }

    /// Full protocol from `Pending`: prepare phase, then decision and
    /// delivery. Caller holds the record's driver lock.
    async fn drive_commit(&self, record: &TransactionRecord) -> Result<bool> {
        record.advance(TransactionStatus::Preparing);
        let participants = record.participants();

        if participants.is_empty() {
            // Vacuous prepare success
            record.advance(TransactionStatus::Prepared);
            return self.decide(record, Decision::Commit).await;
        }

        let Some(budget) = record.prepare_budget(self.config.prepare_timeout) else {
            tracing::warn!(txn = %record.id, "transaction deadline passed before prepare");
            record.advance(TransactionStatus::Aborted);
            return self.decide(record, Decision::Abort).await;
        };

        let votes = self
            .executor
            .run_phase(PhaseOp::Prepare, &participants, record.id, budget)
            .await;

        if votes.all_succeeded() {
            record.advance(TransactionStatus::Prepared);
            self.decide(record, Decision::Commit).await
        } else {
            tracing::debug!(
                txn = %record.id,
                voted_no = ?votes.failed,
                unresponsive = ?votes.timed_out,
                "prepare phase failed"
            );
            record.advance(TransactionStatus::Aborted);
            // Rollback goes to every enlisted participant, including the
            // unresponsive ones whose prepare may have reserved resources
            self.decide(record, Decision::Abort).await
        }
    }

    /// The decision point: append to the log, then deliver. If the append
    /// fails the transaction stays in `Prepared`/`Aborted` and no delivery
    /// is attempted; a later `commit` call resumes from here.
    async fn decide(&self, record: &TransactionRecord, decision: Decision) -> Result<bool> {
        let participants = record.participants();

        self.log
            .append(DecisionRecord {
                txn: record.id,
                decision,
                participants: participants.clone(),
            })
            .map_err(|source| CoordinatorError::UnrecordedDecision {
                txn: record.id,
                source,
            })?;
        record.record_decision(decision);
        tracing::info!(
            txn = %record.id,
            %decision,
            participants = participants.len(),
            "decision recorded"
        );

        match decision {
            Decision::Commit => record.advance(TransactionStatus::Committing),
            Decision::Abort => record.advance(TransactionStatus::RollingBack),
        }

        self.finish_delivery(record, decision).await;
        Ok(decision == Decision::Commit)
    }

    /// Deliver an already-durable decision and, if every participant
    /// acknowledged, move the record to its terminal state
    async fn finish_delivery(&self, record: &TransactionRecord, decision: Decision) {
        let participants = record.participants();
        if self
            .deliver_decision(record.id, decision, &participants)
            .await
        {
            match decision {
                Decision::Commit => record.advance(TransactionStatus::Committed),
                Decision::Abort => record.advance(TransactionStatus::RolledBack),
            }
            tracing::info!(txn = %record.id, %decision, "transaction completed");
        }
    }

    /// Deliver a decision to participants with bounded retry; returns
    /// whether every participant acknowledged
    async fn deliver_decision(
        &self,
        txn: TransactionId,
        decision: Decision,
        participants: &[Arc<dyn Participant>],
    ) -> bool {
        let op = match decision {
            Decision::Commit => PhaseOp::Commit,
            Decision::Abort => PhaseOp::Rollback,
        };

        let outcome = self.executor.deliver_with_retry(op, participants, txn).await;
        if outcome.all_succeeded() {
            if let Err(error) = self.log.mark_complete(txn) {
                // Recovery may redeliver; participants are idempotent by
                // contract, so this costs duplicate delivery, not correctness
                tracing::warn!(%txn, %error, "failed to mark decision complete");
            }
            true
        } else {
            let undelivered = outcome.undelivered();
            tracing::error!(
                %txn,
                %decision,
                ?undelivered,
                "delivery exhausted retries; operator attention required"
            );
            self.delivery_failures.lock().push(DeliveryFailure {
                txn,
                decision,
                undelivered,
            });
            false
        }
    }
}
