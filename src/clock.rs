use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Per-entry logical timestamp: `(writer id, time)`.
///
/// `time` respects causality within one writer; across writers the pair
/// `(time, id)` plus the entry CID gives a tie-breakable total order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LamportClock {
    pub id: String,
    pub time: u64,
}

impl LamportClock {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            time: 0,
        }
    }

    pub fn at(id: impl Into<String>, time: u64) -> Self {
        Self {
            id: id.into(),
            time,
        }
    }

    /// Clock for a new entry: one past the latest parent, or 1 for a tail.
    pub fn tick_past(id: impl Into<String>, parent_times: impl Iterator<Item = u64>) -> Self {
        Self {
            id: id.into(),
            time: parent_times.max().unwrap_or(0) + 1,
        }
    }
}

impl PartialOrd for LamportClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LamportClock {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.id.cmp(&other.id))
    }
}
