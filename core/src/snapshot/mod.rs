//! Distributed state collection (Chandy-Lamport snapshots)

pub mod agent;
pub mod message;
pub mod timer;
pub mod version;

pub use agent::{ResponseOutcome, SnapshotAgent};
pub use message::{consolidate, CollectedState, MessageError, SnapshotMessage, StateFragment};
pub use timer::{ManualResponseTimer, ResponseTimer, ScheduledResponseTimer};
pub use version::{SnapshotVersion, SENTINEL_INITIATOR};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("malformed snapshot message: {0}")]
    Message(#[from] MessageError),
}
