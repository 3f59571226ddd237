//! Real-time round-robin phase scheduler
//!
//! All scheduling state (module registry, phase cursor, work queues, timers)
//! lives on a single task. Everything else talks to it through a
//! [`SchedulerHandle`], which pushes commands onto an unbounded ingress
//! channel and is safe to use from any thread.
//!
//! Jobs run synchronously on the scheduler task, one at a time. After each
//! job the worker posts its own continuation to the back of the ingress
//! channel, so commands that arrived while the job ran are handled before the
//! next job starts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::phase::PhaseCursor;
use super::queue::{Job, WorkQueueSet};
use super::registry::{ModuleEntry, ModuleId, ModuleRegistry};
use super::timer::{
    Armed, HandleSource, TimerCallback, TimerFired, TimerHandle, TimerRegistry, TimerStatus,
};
use super::SchedulerError;
use crate::clock::Clock;

/// Capacity of the phase-change broadcast; slow subscribers see `Lagged`.
const PHASE_EVENT_CAPACITY: usize = 64;

/// Scheduler tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How long the cursor may step relatively before it is snapped back to
    /// the wall-clock-derived phase
    pub alignment_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            alignment_interval: Duration::from_secs(10),
        }
    }
}

/// Published on every phase advance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseChange {
    /// Monotonic phase counter
    pub counter: u64,
    pub index: usize,
    pub module: ModuleId,
    /// Time until the next advance
    pub duration: Duration,
    pub aligned: bool,
    /// Skew-adjusted wall time of the advance
    pub at: DateTime<Utc>,
}

enum Command {
    Register { id: ModuleId, phase: Duration },
    AllocateTimer { handle: TimerHandle, owner: ModuleId },
    ScheduleAfter { handle: TimerHandle, delay: Duration, callback: TimerCallback },
    ScheduleNow { module: ModuleId, job: Job, start_worker: bool },
    Post(Job),
    Work,
    Modules(oneshot::Sender<Vec<ModuleEntry>>),
    QueueDepth { module: ModuleId, reply: oneshot::Sender<usize> },
    Stop,
}

/// Cloneable, thread-safe front door to a running [`PhaseScheduler`]
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
    handles: HandleSource,
    phases: broadcast::Sender<PhaseChange>,
}

impl SchedulerHandle {
    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("Scheduler loop has stopped; command dropped");
        }
    }

    /// Add a module to the round-robin sequence.
    ///
    /// Registering an id that is already known does nothing. The first
    /// registration starts the phase clock immediately.
    pub fn register_module(&self, id: impl Into<ModuleId>, phase: Duration) {
        self.send(Command::Register { id: id.into(), phase });
    }

    /// Allocate a reusable timer whose jobs are queued under `owner`
    pub fn allocate_timer(&self, owner: impl Into<ModuleId>) -> TimerHandle {
        let handle = self.handles.next();
        self.send(Command::AllocateTimer {
            handle,
            owner: owner.into(),
        });
        handle
    }

    /// Arm `handle` to queue `job` after `delay`.
    ///
    /// The job always runs, bound to the status the timer finished with: a
    /// later re-arm of the same handle delivers [`TimerStatus::Cancelled`].
    pub fn schedule_after<F>(&self, handle: TimerHandle, delay: Duration, job: F)
    where
        F: FnOnce(TimerStatus) + Send + 'static,
    {
        self.send(Command::ScheduleAfter {
            handle,
            delay,
            callback: Box::new(job),
        });
    }

    /// Queue `job` for `module` without delay.
    ///
    /// With `start_worker` false an idle worker is left idle, deferring the
    /// job to the next phase advance or the next job that wakes the worker.
    pub fn schedule_now<F>(&self, module: impl Into<ModuleId>, job: F, start_worker: bool)
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Command::ScheduleNow {
            module: module.into(),
            job: Box::new(job),
            start_worker,
        });
    }

    /// Run `job` on the scheduler loop outside of any module queue
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Command::Post(Box::new(job)));
    }

    pub fn subscribe_phases(&self) -> broadcast::Receiver<PhaseChange> {
        self.phases.subscribe()
    }

    /// Registered modules in round-robin order
    pub async fn modules(&self) -> Result<Vec<ModuleEntry>, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Modules(reply))
            .map_err(|_| SchedulerError::Stopped)?;
        rx.await.map_err(|_| SchedulerError::Stopped)
    }

    /// Jobs waiting in `module`'s queue
    pub async fn queue_depth(&self, module: impl Into<ModuleId>) -> Result<usize, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::QueueDepth {
                module: module.into(),
                reply,
            })
            .map_err(|_| SchedulerError::Stopped)?;
        rx.await.map_err(|_| SchedulerError::Stopped)
    }

    /// Ask the loop to exit; pending timers are torn down.
    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

pub struct PhaseScheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    modules: ModuleRegistry,
    queues: WorkQueueSet,
    timers: TimerRegistry,
    timer_events: mpsc::UnboundedReceiver<TimerFired>,
    cursor: PhaseCursor,
    /// Set while a worker continuation is outstanding
    busy: bool,
    phase_deadline: Option<Instant>,
    commands: mpsc::UnboundedReceiver<Command>,
    continuation: mpsc::WeakUnboundedSender<Command>,
    phases: broadcast::Sender<PhaseChange>,
}

impl PhaseScheduler {
    /// Build an idle scheduler and the handle used to drive it.
    ///
    /// The loop exits on [`SchedulerHandle::stop`] or once every handle has
    /// been dropped.
    pub fn new(config: SchedulerConfig, clock: Arc<dyn Clock>) -> (Self, SchedulerHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let (phases, _) = broadcast::channel(PHASE_EVENT_CAPACITY);
        let handles = HandleSource::default();
        let (timers, timer_events) = TimerRegistry::with_handles(handles.clone());
        let cursor = PhaseCursor::new(clock.now(), config.alignment_interval);

        let scheduler = Self {
            config,
            clock,
            modules: ModuleRegistry::new(),
            queues: WorkQueueSet::new(),
            timers,
            timer_events,
            cursor,
            busy: false,
            phase_deadline: None,
            commands,
            continuation: tx.downgrade(),
            phases: phases.clone(),
        };
        let handle = SchedulerHandle {
            tx,
            handles,
            phases,
        };
        (scheduler, handle)
    }

    /// Build a scheduler and run it on a new task
    pub fn spawn(config: SchedulerConfig, clock: Arc<dyn Clock>) -> (SchedulerHandle, JoinHandle<()>) {
        let (scheduler, handle) = Self::new(config, clock);
        let task = tokio::spawn(scheduler.run());
        (handle, task)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Drive the scheduler until stopped
    pub async fn run(mut self) {
        info!(
            alignment_ms = self.config.alignment_interval.as_millis() as u64,
            "Phase scheduler started"
        );
        let phase_timer = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(phase_timer);

        loop {
            if let Some(deadline) = self.phase_deadline {
                if phase_timer.deadline() != deadline {
                    phase_timer.as_mut().reset(deadline);
                }
            }

            tokio::select! {
                biased;
                () = &mut phase_timer, if self.phase_deadline.is_some() => {
                    self.phase_deadline = None;
                    self.change_phase();
                }
                Some(fired) = self.timer_events.recv() => {
                    self.on_timer_fired(fired);
                }
                command = self.commands.recv() => match command {
                    Some(Command::Stop) | None => break,
                    Some(command) => self.apply(command),
                },
            }
        }

        let dropped = self.timers.shutdown();
        info!(
            pending_timers = dropped,
            queued_jobs = self.queues.total(),
            phases = self.cursor.counter(),
            "Phase scheduler stopped"
        );
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register { id, phase } => self.register_module(id, phase),
            Command::AllocateTimer { handle, owner } => {
                trace!(%handle, module = %owner, "Allocated timer");
                self.timers.insert(handle, owner);
            }
            Command::ScheduleAfter {
                handle,
                delay,
                callback,
            } => self.schedule_after(handle, delay, callback),
            Command::ScheduleNow {
                module,
                job,
                start_worker,
            } => {
                let depth = self.queues.push(&module, job);
                debug!(module = %module, depth, "Scheduled task (no delay)");
                if start_worker {
                    self.start_worker();
                }
            }
            Command::Post(job) => job(),
            Command::Work => self.worker(),
            Command::Modules(reply) => {
                let _ = reply.send(self.modules.entries().to_vec());
            }
            Command::QueueDepth { module, reply } => {
                let _ = reply.send(self.queues.len(&module));
            }
            Command::Stop => {}
        }
    }

    fn register_module(&mut self, id: ModuleId, phase: Duration) {
        if !self.modules.register(id.clone(), phase) {
            debug!(module = %id, "Module already registered");
            return;
        }
        info!(module = %id, phase_ms = phase.as_millis() as u64, "Registered module");
        if self.modules.len() == 1 {
            self.change_phase();
        }
    }

    fn schedule_after(&mut self, handle: TimerHandle, delay: Duration, callback: TimerCallback) {
        match self.timers.arm(handle, delay, callback) {
            Armed::Fresh => {
                debug!(%handle, delay_ms = delay.as_millis() as u64, "Scheduled task for timer");
            }
            Armed::Replaced { owner, callback } => {
                debug!(%handle, "Re-armed timer; previous firing cancelled");
                self.enqueue_fired(owner, handle, callback, TimerStatus::Cancelled);
            }
            Armed::UnknownHandle => {
                error!(%handle, "Schedule on a timer that was never allocated; job dropped");
            }
        }
    }

    fn on_timer_fired(&mut self, fired: TimerFired) {
        match self.timers.fire(fired) {
            Some((owner, callback)) => {
                self.enqueue_fired(owner, fired.handle, callback, TimerStatus::Expired)
            }
            None => trace!(handle = %fired.handle, "Ignored stale timer report"),
        }
    }

    fn enqueue_fired(
        &mut self,
        owner: ModuleId,
        handle: TimerHandle,
        callback: TimerCallback,
        status: TimerStatus,
    ) {
        let depth = self.queues.push(&owner, Box::new(move || callback(status)));
        debug!(%handle, module = %owner, ?status, depth, "Timer finished");
        self.start_worker();
    }

    fn change_phase(&mut self) {
        let now = self.clock.now();
        let phases = self.modules.phases();
        let Some(step) = self.cursor.advance(&phases, now) else {
            self.phase_deadline = None;
            return;
        };
        let module = self
            .modules
            .get(step.index)
            .map(|m| m.id.clone())
            .unwrap_or_default();

        if step.aligned {
            info!(
                module = %module,
                index = step.index,
                remaining_ms = step.duration.as_millis() as u64,
                "Aligned phase"
            );
        } else {
            debug!(module = %module, "Phase");
        }
        let _ = self.phases.send(PhaseChange {
            counter: self.cursor.counter(),
            index: step.index,
            module,
            duration: step.duration,
            aligned: step.aligned,
            at: now,
        });

        self.start_worker();
        self.phase_deadline = Some(Instant::now() + step.duration);
    }

    fn start_worker(&mut self) {
        if !self.busy {
            self.worker();
        }
    }

    /// Run one job from the active module's queue and post a continuation,
    /// or go idle when the queue is empty.
    fn worker(&mut self) {
        let active = match self.modules.get(self.cursor.index()) {
            Some(entry) => entry.id.clone(),
            None => {
                self.busy = false;
                return;
            }
        };

        match self.queues.pop(&active) {
            Some(job) => {
                self.busy = true;
                trace!(module = %active, "Performing job");
                job();
                match self.continuation.upgrade() {
                    Some(tx) if tx.send(Command::Work).is_ok() => {}
                    _ => self.busy = false,
                }
            }
            None => {
                self.busy = false;
                trace!(module = %active, "Worker idle");
            }
        }
    }
}
