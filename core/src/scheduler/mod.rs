pub mod broker;
pub mod phase;
pub mod queue;
pub mod registry;
pub mod timer;

pub use broker::{PhaseChange, PhaseScheduler, SchedulerConfig, SchedulerHandle};
pub use phase::{natural_phase, NaturalPhase, PhaseCursor, PhaseStep};
pub use queue::{Job, WorkQueueSet};
pub use registry::{ModuleEntry, ModuleId, ModuleRegistry, MIN_PHASE};
pub use timer::{TimerHandle, TimerRegistry, TimerStatus};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler loop has stopped")]
    Stopped,
}
