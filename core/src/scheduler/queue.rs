//! Per-module FIFO job queues

use std::collections::{HashMap, VecDeque};

use super::registry::ModuleId;

/// A deferred unit of work. Timer jobs are bound to their firing status
/// before they are queued, so everything in a queue takes no arguments.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
pub struct WorkQueueSet {
    queues: HashMap<ModuleId, VecDeque<Job>>,
}

impl WorkQueueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job to the module's queue, creating the queue on first use.
    /// Returns the queue length after the push.
    pub fn push(&mut self, module: &str, job: Job) -> usize {
        let queue = self.queues.entry(module.to_string()).or_default();
        queue.push_back(job);
        queue.len()
    }

    pub fn pop(&mut self, module: &str) -> Option<Job> {
        self.queues.get_mut(module).and_then(VecDeque::pop_front)
    }

    pub fn len(&self, module: &str) -> usize {
        self.queues.get(module).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, module: &str) -> bool {
        self.len(module) == 0
    }

    /// Jobs waiting across every module
    pub fn total(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}

impl std::fmt::Debug for WorkQueueSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let depths: HashMap<&str, usize> = self
            .queues
            .iter()
            .map(|(k, v)| (k.as_str(), v.len()))
            .collect();
        f.debug_struct("WorkQueueSet").field("depths", &depths).finish()
    }
}
