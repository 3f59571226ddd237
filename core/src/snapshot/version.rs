use serde::{Deserialize, Serialize};
use std::fmt;

use crate::peer::PeerId;

/// Initiator name of the "no snapshot in progress" version
pub const SENTINEL_INITIATOR: &str = "default";

/// Identity of one snapshot: who started it and that initiator's sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotVersion {
    pub initiator: PeerId,
    pub sequence: u64,
}

impl SnapshotVersion {
    pub fn new(initiator: impl Into<PeerId>, sequence: u64) -> Self {
        Self {
            initiator: initiator.into(),
            sequence,
        }
    }

    pub fn sentinel() -> Self {
        Self::new(SENTINEL_INITIATOR, 0)
    }

    pub fn is_sentinel(&self) -> bool {
        self.initiator == SENTINEL_INITIATOR && self.sequence == 0
    }

    pub fn initiated_by(&self, peer: &str) -> bool {
        self.initiator == peer
    }
}

impl Default for SnapshotVersion {
    fn default() -> Self {
        Self::sentinel()
    }
}

impl fmt::Display for SnapshotVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.initiator, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel() {
        assert!(SnapshotVersion::default().is_sentinel());
        assert!(!SnapshotVersion::new("a", 1).is_sentinel());
        assert_eq!(SnapshotVersion::new("a", 7).to_string(), "(a, 7)");
    }
}
