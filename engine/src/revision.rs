//! Local revision counter for causal bookkeeping.
//!
//! Every local mutation ticks the revision. A write captures the revision it
//! was issued at, so the engine can tell whether the user has touched the
//! state since, without consulting a wall clock.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A monotonically increasing count of local mutations.
///
/// Ordering is plain counter ordering. Revisions are local to one engine
/// instance and never compared across processes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    /// The revision before any mutation.
    pub const ZERO: Revision = Revision(0);

    /// Create a revision at a specific counter value.
    pub fn new(counter: u64) -> Self {
        Self(counter)
    }

    /// Increment and return the new value.
    pub fn tick(&mut self) -> Revision {
        self.0 += 1;
        *self
    }

    /// The raw counter.
    pub fn counter(&self) -> u64 {
        self.0
    }

    /// True if `self` was issued strictly before `other`.
    pub fn happened_before(&self, other: &Revision) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}
