//! Top-level error type for node bootstrap and shutdown
//!
//! Each subsystem has its own error enum; this one wraps them so that code
//! driving a whole node can use a single `Result`.

use thiserror::Error;

use crate::config::ConfigError;
use crate::device::DeviceError;
use crate::scheduler::SchedulerError;
use crate::snapshot::SnapshotError;

#[derive(Error, Debug)]
pub enum BrokerError {
    // =========================================================================
    // Subsystem Errors
    // =========================================================================
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("state collection error: {0}")]
    Snapshot(#[from] SnapshotError),

    // =========================================================================
    // Task Errors
    // =========================================================================
    /// A node task panicked or was aborted
    #[error("task {task} failed: {message}")]
    TaskFailed { task: &'static str, message: String },
}

impl BrokerError {
    /// Whether the operator has to change something before retrying
    pub fn requires_user_action(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Device(_))
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_user_action() {
        let err: BrokerError = DeviceError::UnknownClass("Turbine".into()).into();
        assert!(err.requires_user_action());
        assert!(err.to_string().contains("Turbine"));

        let err: BrokerError = SchedulerError::Stopped.into();
        assert!(!err.requires_user_action());
    }
}
