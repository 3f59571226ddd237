//! Ordered module registry
//!
//! Insertion order is the round-robin order. Entries are never removed.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifier of a schedulable module (e.g. "gm", "sc", "lb")
pub type ModuleId = String;

/// Shortest phase a module may be given
pub const MIN_PHASE: Duration = Duration::from_millis(1);

/// One registered module and the length of its phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub id: ModuleId,
    pub phase: Duration,
}

#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: Vec<ModuleEntry>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a module unless one with the same id exists.
    ///
    /// Returns `true` if the module was inserted. A duplicate registration
    /// leaves both the sequence and the original duration untouched.
    pub fn register(&mut self, id: impl Into<ModuleId>, phase: Duration) -> bool {
        let id = id.into();
        if self.contains(&id) {
            return false;
        }
        self.modules.push(ModuleEntry {
            id,
            phase: phase.max(MIN_PHASE),
        });
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modules.iter().any(|m| m.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.id == id)
    }

    pub fn get(&self, index: usize) -> Option<&ModuleEntry> {
        self.modules.get(index)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Phase durations in round-robin order
    pub fn phases(&self) -> Vec<Duration> {
        self.modules.iter().map(|m| m.phase).collect()
    }

    /// Sum of all phase durations
    pub fn round_length(&self) -> Duration {
        self.modules.iter().map(|m| m.phase).sum()
    }

    pub fn entries(&self) -> &[ModuleEntry] {
        &self.modules
    }
}
