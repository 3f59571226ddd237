pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod node;
pub mod peer;
pub mod scheduler;
pub mod snapshot;

// Re-exports for convenience
pub use clock::{AnchoredClock, Clock, SystemClock};
pub use config::BrokerConfig;
pub use error::BrokerError;
pub use node::{BrokerNode, SnapshotResults};
pub use peer::{InMemoryNetwork, PeerMessage};
pub use scheduler::{PhaseScheduler, SchedulerHandle};
pub use snapshot::{CollectedState, SnapshotAgent, SnapshotVersion};
