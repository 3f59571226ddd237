//! Response timeout for snapshot initiators

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::scheduler::{SchedulerHandle, TimerHandle, TimerStatus};

/// Arms the initiator's response timeout.
///
/// Implementations report the outcome on the agent's timer channel; arming
/// again before the timeout replaces the pending one, which then reports
/// [`TimerStatus::Cancelled`].
pub trait ResponseTimer: Send {
    fn arm(&mut self, delay: Duration);
}

/// Response timer backed by a scheduler timer.
///
/// The timeout is queued under the timer's owning module, so the agent sees
/// it during that module's phase.
pub struct ScheduledResponseTimer {
    scheduler: SchedulerHandle,
    handle: TimerHandle,
    status_tx: mpsc::UnboundedSender<TimerStatus>,
}

impl ScheduledResponseTimer {
    pub fn new(
        scheduler: SchedulerHandle,
        handle: TimerHandle,
        status_tx: mpsc::UnboundedSender<TimerStatus>,
    ) -> Self {
        Self {
            scheduler,
            handle,
            status_tx,
        }
    }
}

impl ResponseTimer for ScheduledResponseTimer {
    fn arm(&mut self, delay: Duration) {
        let status_tx = self.status_tx.clone();
        self.scheduler.schedule_after(self.handle, delay, move |status| {
            let _ = status_tx.send(status);
        });
    }
}

/// Records arms and leaves firing to the caller
#[derive(Debug, Clone, Default)]
pub struct ManualResponseTimer {
    arms: Arc<Mutex<Vec<Duration>>>,
}

impl ManualResponseTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays passed to every arm so far
    pub fn arms(&self) -> Vec<Duration> {
        self.arms.lock().clone()
    }
}

impl ResponseTimer for ManualResponseTimer {
    fn arm(&mut self, delay: Duration) {
        self.arms.lock().push(delay);
    }
}
