use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Replay-side identifiers allocate from this value upward so they can never
/// collide with identifiers read out of a capture log.
pub const REPLAY_ID_BASE: u64 = 1 << 62;

/// Stable, opaque identifier for a GPU object across capture and replay.
///
/// Ids are allocated monotonically from a process-wide counter and never
/// reused. `ResourceId::NULL` (zero) is the known null sentinel; it is valid
/// inside chunk payloads and means "no resource".
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    pub const NULL: ResourceId = ResourceId(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    /// Reconstruct an id from its wire representation. Only the serializer
    /// and tests should need this.
    pub fn from_raw(raw: u64) -> Self {
        ResourceId(raw)
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "ResourceId(null)")
        } else {
            write!(f, "ResourceId({})", self.0)
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide [`ResourceId`] generator.
///
/// Initialised at library load, torn down only at process exit; capture and
/// replay cannot coexist in one process, so flipping to the replay range is a
/// one-way operation.
pub struct ResourceIdGen;

impl ResourceIdGen {
    /// Allocate the next unique id.
    pub fn next() -> ResourceId {
        ResourceId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Move the generator into the replay range so ids created while
    /// replaying are disjoint from every id recorded in the log.
    pub fn set_replay_ids() {
        NEXT_ID.fetch_max(REPLAY_ID_BASE, Ordering::Relaxed);
    }

    /// True if `id` was allocated after [`Self::set_replay_ids`].
    pub fn is_replay_id(id: ResourceId) -> bool {
        id.0 >= REPLAY_ID_BASE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_monotonic() {
        let a = ResourceIdGen::next();
        let b = ResourceIdGen::next();
        assert!(b > a);
        assert!(!a.is_null());
    }

    #[test]
    fn replay_range_is_disjoint() {
        let before = ResourceIdGen::next();
        ResourceIdGen::set_replay_ids();
        let after = ResourceIdGen::next();
        assert!(!ResourceIdGen::is_replay_id(before));
        assert!(ResourceIdGen::is_replay_id(after));
    }
}
