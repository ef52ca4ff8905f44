//! Distributed transaction coordination via two-phase commit
//!
//! A single active [`Coordinator`] drives transactions across a set of
//! independently failing [`Participant`]s: a concurrent prepare phase
//! collects votes under per-call timeouts, the decision is durably appended
//! to an injected [`TransactionLog`] before any delivery starts, and
//! commit/rollback delivery uses bounded retry with configurable backoff.
//! After a crash, [`Coordinator::recover`] replays logged decisions whose
//! delivery never finished.
//!
//! Participants are in-process capabilities; transport, participant-side
//! durability, and coordinator election are the caller's concern.

mod config;
mod coordinator;
mod error;
mod executor;
mod log;
mod participant;
mod transaction;
mod transaction_id;

pub use config::{CoordinatorConfig, RetryBackoff};
pub use coordinator::{Coordinator, DeliveryFailure};
pub use error::{CoordinatorError, Result};
pub use log::{DecisionRecord, LogError, LogResult, MemoryLog, TransactionLog};
pub use participant::{Participant, ParticipantError, ParticipantResult};
pub use transaction::{Decision, TransactionStatus};
pub use transaction_id::TransactionId;
