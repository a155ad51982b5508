/// Snapshot state definitions for tracking crawl progress
///
/// This module defines all possible lifecycle states a snapshot can be in,
/// together with their integer encoding in the database and the legal
/// transition table.
use std::fmt;

/// Represents the current lifecycle stage of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotState {
    // ===== Active States =====
    /// Discovered by link extraction but not yet visited
    Pending,

    /// Visited and metadata collected; eligible for recording
    Scouted,

    /// A capture attempt failed; returns to Scouted eligibility after a cool-down
    RecordFailed,

    /// Capture succeeded; eligible for publishing
    Recorded,

    // ===== Terminal States =====
    /// Filtered by domain policy, year bounds, or a fetch error.
    /// Terminal unless manually re-queued.
    Rejected,

    /// Posted standalone
    Published,

    /// Merged into a compilation instead of posted standalone
    Compiled,
}

impl SnapshotState {
    /// Returns true if this is a terminal state (no further processing happens
    /// without a manual enqueue).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Published | Self::Compiled)
    }

    /// Returns true if the scout workflow still has work to do on this row
    pub fn is_scoutable(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Returns true if the record workflow may pick this row up
    pub fn is_recordable(&self) -> bool {
        matches!(self, Self::Scouted | Self::RecordFailed)
    }

    /// Returns true if the publish workflow may pick this row up
    pub fn is_publishable(&self) -> bool {
        matches!(self, Self::Recorded)
    }

    /// Returns true if `to` is a legal forward transition from this state.
    ///
    /// Manual enqueue operations may additionally reset any state back to
    /// Pending or Scouted; those bypass this table on purpose.
    pub fn can_transition_to(&self, to: SnapshotState) -> bool {
        use SnapshotState::*;
        matches!(
            (self, to),
            (Pending, Scouted)
                | (Pending, Rejected)
                | (Scouted, Recorded)
                | (Scouted, RecordFailed)
                | (Scouted, Rejected)
                | (RecordFailed, Scouted)
                | (RecordFailed, Recorded)
                | (RecordFailed, Rejected)
                | (Recorded, Published)
                | (Recorded, Compiled)
        )
    }

    /// Converts the state to its integer encoding in the database.
    ///
    /// Codes are ordered so that `>= Scouted` selects everything that has
    /// been visited at least once.
    pub fn to_code(&self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Rejected => 1,
            Self::Scouted => 2,
            Self::RecordFailed => 3,
            Self::Recorded => 4,
            Self::Published => 5,
            Self::Compiled => 6,
        }
    }

    /// Parses a state from its integer encoding.
    ///
    /// Returns None if the code doesn't match any known state.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Pending),
            1 => Some(Self::Rejected),
            2 => Some(Self::Scouted),
            3 => Some(Self::RecordFailed),
            4 => Some(Self::Recorded),
            5 => Some(Self::Published),
            6 => Some(Self::Compiled),
            _ => None,
        }
    }

    /// Returns all possible snapshot states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Rejected,
            Self::Scouted,
            Self::RecordFailed,
            Self::Recorded,
            Self::Published,
            Self::Compiled,
        ]
    }
}

impl fmt::Display for SnapshotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Rejected => "rejected",
            Self::Scouted => "scouted",
            Self::RecordFailed => "record_failed",
            Self::Recorded => "recorded",
            Self::Published => "published",
            Self::Compiled => "compiled",
        };
        write!(f, "{}", name)
    }
}
