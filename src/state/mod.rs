//! Snapshot lifecycle state machine
//!
//! Every discovered URL moves through these states, mutated by the scout,
//! record, and publish workflows. Transitions are single-writer per row:
//! the workflow performing one must hold the row's claim for the duration
//! (see the storage module's claim contract).

mod snapshot_state;

pub use snapshot_state::SnapshotState;

/// A workflow stage a snapshot can be manually prioritized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Scout,
    Record,
    Publish,
}

/// Width of each manual priority band.
pub const PRIORITY_SIZE: i64 = 1000;

/// Priority of rows that have not been manually enqueued.
pub const NO_PRIORITY: i64 = 0;

impl Stage {
    /// The manual priority assigned when a snapshot is enqueued for this stage.
    ///
    /// Bands are ordered so that a publish enqueue outranks a record enqueue,
    /// which outranks a scout enqueue.
    pub fn priority(&self) -> i64 {
        match self {
            Self::Scout => PRIORITY_SIZE,
            Self::Record => 2 * PRIORITY_SIZE,
            Self::Publish => 3 * PRIORITY_SIZE,
        }
    }

    /// The stage a manual priority value belongs to, if any.
    pub fn from_priority(priority: i64) -> Option<Self> {
        [Self::Scout, Self::Record, Self::Publish]
            .into_iter()
            .find(|stage| stage.priority() == priority)
    }

    /// Returns true once a snapshot in `state` no longer needs this stage's
    /// work, so a manual priority for it has served its purpose.
    pub fn satisfied_by(&self, state: SnapshotState) -> bool {
        use SnapshotState::*;
        if state == Rejected {
            return true;
        }
        match self {
            Self::Scout => state != Pending,
            Self::Record => matches!(state, Recorded | Published | Compiled),
            Self::Publish => matches!(state, Published | Compiled),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scout => "scout",
            Self::Record => "record",
            Self::Publish => "publish",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scout" => Some(Self::Scout),
            "record" => Some(Self::Record),
            "publish" => Some(Self::Publish),
            _ => None,
        }
    }
}
