//! Cancellable timer pool
//!
//! Timers are allocated once per owner and re-armed as often as needed; they
//! are only torn down together with the registry. Each arm spawns a sleeper
//! task that reports back over a channel, and the registry (owned by the
//! scheduler loop) decides whether that report is still current.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::registry::ModuleId;

/// Opaque timer handle, unique for the lifetime of a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Monotonic handle source shared between the loop and its handles, so a
/// handle can be returned to the caller without a round trip.
#[derive(Debug, Clone, Default)]
pub struct HandleSource(Arc<AtomicU64>);

impl HandleSource {
    pub fn next(&self) -> TimerHandle {
        TimerHandle(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Why a timer callback is being invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    /// The delay elapsed
    Expired,
    /// The pending firing was replaced by a re-arm or torn down
    Cancelled,
}

impl TimerStatus {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TimerStatus::Cancelled)
    }
}

pub type TimerCallback = Box<dyn FnOnce(TimerStatus) + Send + 'static>;

/// Report from a sleeper task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub handle: TimerHandle,
    generation: u64,
}

/// Result of arming a timer
pub enum Armed {
    /// Nothing was pending
    Fresh,
    /// A pending callback was displaced; the caller must deliver it with
    /// [`TimerStatus::Cancelled`]
    Replaced { owner: ModuleId, callback: TimerCallback },
    /// The handle was never allocated; the callback was dropped
    UnknownHandle,
}

struct PendingFire {
    callback: TimerCallback,
    sleeper: JoinHandle<()>,
}

struct TimerSlot {
    owner: ModuleId,
    generation: u64,
    pending: Option<PendingFire>,
}

pub struct TimerRegistry {
    slots: HashMap<TimerHandle, TimerSlot>,
    handles: HandleSource,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
}

impl TimerRegistry {
    /// Create an empty registry and the channel its sleepers report on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        Self::with_handles(HandleSource::default())
    }

    pub fn with_handles(handles: HandleSource) -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let registry = Self {
            slots: HashMap::new(),
            handles,
            fired_tx,
        };
        (registry, fired_rx)
    }

    pub fn handles(&self) -> HandleSource {
        self.handles.clone()
    }

    /// Allocate a fresh timer for `owner`
    pub fn allocate(&mut self, owner: impl Into<ModuleId>) -> TimerHandle {
        let handle = self.handles.next();
        self.insert(handle, owner);
        handle
    }

    /// Bind a handle obtained from [`HandleSource::next`] to `owner`
    pub fn insert(&mut self, handle: TimerHandle, owner: impl Into<ModuleId>) {
        self.slots.insert(
            handle,
            TimerSlot {
                owner: owner.into(),
                generation: 0,
                pending: None,
            },
        );
    }

    pub fn owner(&self, handle: TimerHandle) -> Option<&str> {
        self.slots.get(&handle).map(|s| s.owner.as_str())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.slots.get(&handle).is_some_and(|s| s.pending.is_some())
    }

    /// Arm `handle` to fire after `delay`, replacing any pending firing.
    pub fn arm(&mut self, handle: TimerHandle, delay: Duration, callback: TimerCallback) -> Armed {
        let Some(slot) = self.slots.get_mut(&handle) else {
            return Armed::UnknownHandle;
        };

        slot.generation += 1;
        let generation = slot.generation;
        let fired_tx = self.fired_tx.clone();
        let sleeper = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired_tx.send(TimerFired { handle, generation });
        });

        let previous = slot.pending.replace(PendingFire { callback, sleeper });
        match previous {
            Some(prev) => {
                prev.sleeper.abort();
                Armed::Replaced {
                    owner: slot.owner.clone(),
                    callback: prev.callback,
                }
            }
            None => Armed::Fresh,
        }
    }

    /// Claim the callback for a sleeper report.
    ///
    /// Returns `None` when the report is stale (the slot was re-armed after
    /// this sleeper started) or the handle is unknown.
    pub fn fire(&mut self, fired: TimerFired) -> Option<(ModuleId, TimerCallback)> {
        let slot = self.slots.get_mut(&fired.handle)?;
        if slot.generation != fired.generation {
            return None;
        }
        let pending = slot.pending.take()?;
        Some((slot.owner.clone(), pending.callback))
    }

    /// Abort every sleeper and drop every timer.
    ///
    /// Returns how many callbacks were still pending.
    pub fn shutdown(&mut self) -> usize {
        let mut dropped = 0;
        for (_, slot) in self.slots.drain() {
            if let Some(pending) = slot.pending {
                pending.sleeper.abort();
                dropped += 1;
            }
        }
        dropped
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerRegistry")
            .field("timers", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<TimerStatus>>>, impl Fn() -> TimerCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let make = move || -> TimerCallback {
            let seen = seen_cb.clone();
            Box::new(move |status| seen.lock().push(status))
        };
        (seen, make)
    }

    #[test]
    fn test_handles_are_monotonic() {
        let (mut registry, _rx) = TimerRegistry::new();
        let a = registry.allocate("gm");
        let b = registry.allocate("sc");
        assert!(b > a);
        assert_eq!(registry.owner(a), Some("gm"));
        assert_eq!(registry.owner(b), Some("sc"));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_after_delay() {
        let (mut registry, mut rx) = TimerRegistry::new();
        let (seen, make) = recorder();
        let handle = registry.allocate("lb");

        assert!(matches!(
            registry.arm(handle, Duration::from_millis(30), make()),
            Armed::Fresh
        ));
        assert!(registry.is_pending(handle));

        let fired = rx.recv().await.unwrap();
        let (owner, callback) = registry.fire(fired).unwrap();
        assert_eq!(owner, "lb");
        callback(TimerStatus::Expired);

        assert_eq!(*seen.lock(), vec![TimerStatus::Expired]);
        assert!(!registry.is_pending(handle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending() {
        let (mut registry, mut rx) = TimerRegistry::new();
        let (seen, make) = recorder();
        let handle = registry.allocate("lb");

        registry.arm(handle, Duration::from_millis(10), make());
        match registry.arm(handle, Duration::from_millis(50), make()) {
            Armed::Replaced { owner, callback } => {
                assert_eq!(owner, "lb");
                callback(TimerStatus::Cancelled);
            }
            _ => panic!("expected the first firing to be replaced"),
        }

        let fired = rx.recv().await.unwrap();
        let (_, callback) = registry.fire(fired).unwrap();
        callback(TimerStatus::Expired);

        assert_eq!(
            *seen.lock(),
            vec![TimerStatus::Cancelled, TimerStatus::Expired]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_report_is_ignored() {
        let (mut registry, _rx) = TimerRegistry::new();
        let (_seen, make) = recorder();
        let handle = registry.allocate("lb");
        registry.arm(handle, Duration::from_millis(10), make());
        registry.arm(handle, Duration::from_millis(10), make());

        let stale = TimerFired { handle, generation: 1 };
        assert!(registry.fire(stale).is_none());
        assert!(registry.is_pending(handle));
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let (mut registry, _rx) = TimerRegistry::new();
        let (_seen, make) = recorder();
        let bogus = registry.handles().next();
        assert!(matches!(
            registry.arm(bogus, Duration::from_millis(1), make()),
            Armed::UnknownHandle
        ));
    }

    #[tokio::test]
    async fn test_shutdown_counts_pending() {
        let (mut registry, _rx) = TimerRegistry::new();
        let (_seen, make) = recorder();
        let a = registry.allocate("gm");
        registry.allocate("sc");
        registry.arm(a, Duration::from_secs(60), make());

        assert_eq!(registry.shutdown(), 1);
        assert!(registry.is_empty());
    }
}
