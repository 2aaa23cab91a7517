//! Write bookkeeping records.

use crate::{Fingerprint, Revision, Timestamp};
use serde::{Deserialize, Serialize};

/// Where a state change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// A local `mutate()` call
    Local,
    /// An accepted remote snapshot
    Remote,
    /// Restored from the local cache while the remote store was unreachable
    Cache,
}

/// The engine's own last successful write.
///
/// Owned by the sync state; consumers never see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRecord {
    /// Fingerprint of the written value
    pub fingerprint: Fingerprint,
    /// Authoring timestamp stamped on the write (milliseconds since epoch)
    pub local_save_timestamp: Timestamp,
    /// Local revision the written value was taken at
    pub revision: Revision,
    /// Whether a snapshot with this fingerprint is still read as our echo.
    /// Cleared once a different remote value has been accepted.
    pub echo_expected: bool,
}

/// Local mutations not yet handed to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    /// When the state first became dirty
    pub since: Timestamp,
    /// Timestamp of the latest mutation
    pub last_at: Timestamp,
    /// Revision of the latest mutation
    pub revision: Revision,
}

impl PendingMutation {
    /// Start tracking at the first mutation.
    pub fn new(now: Timestamp, revision: Revision) -> Self {
        Self {
            since: now,
            last_at: now,
            revision,
        }
    }

    /// Fold in a later mutation.
    pub fn touch(&mut self, now: Timestamp, revision: Revision) {
        self.last_at = self.last_at.max(now);
        self.revision = revision;
    }
}

/// A write that has been issued and not yet completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
    /// The document being written
    pub value: serde_json::Value,
    /// Fingerprint of `value`
    pub fingerprint: Fingerprint,
    /// Local revision `value` was taken at
    pub revision: Revision,
    /// Authoring timestamp stamped on the write
    pub issued_at: Timestamp,
    /// How many times this exact value has been attempted
    pub attempts: u32,
    /// Whether a snapshot with this fingerprint is read as our echo
    pub echo_expected: bool,
}

impl PendingWrite {
    /// The save record this write leaves behind once it succeeds.
    pub fn to_save_record(&self) -> SaveRecord {
        SaveRecord {
            fingerprint: self.fingerprint.clone(),
            local_save_timestamp: self.issued_at,
            revision: self.revision,
            echo_expected: self.echo_expected,
        }
    }
}
