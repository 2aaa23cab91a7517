//! Snapshot types crossing the engine boundary.
//!
//! [`RemoteSnapshot`] is what the remote subscription delivers.
//! [`CacheEntry`] is what the local cache persists; it is designed for
//! deterministic serialization and carries its own integrity check.

use crate::{error::Result, Error, Fingerprint, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version of the cache entry format for future compatibility.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// A document as delivered by the remote subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSnapshot {
    /// The raw document, not yet reconciled
    pub value: Value,
    /// Authoring time recorded by whoever last wrote the document
    pub remote_timestamp: Timestamp,
}

impl RemoteSnapshot {
    /// Create a snapshot.
    pub fn new(value: Value, remote_timestamp: Timestamp) -> Self {
        Self {
            value,
            remote_timestamp,
        }
    }
}

/// A document persisted to the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Cache format version
    pub format_version: u32,
    /// Document key the entry belongs to
    pub key: String,
    /// The cached document
    pub value: Value,
    /// When the entry was written (milliseconds since epoch)
    pub saved_at: Timestamp,
    /// Fingerprint of `value`, checked on load
    pub fingerprint: Fingerprint,
}

impl CacheEntry {
    /// Create an entry for `value`.
    pub fn new(key: impl Into<String>, value: Value, saved_at: Timestamp) -> Self {
        Self {
            format_version: CACHE_FORMAT_VERSION,
            key: key.into(),
            fingerprint: Fingerprint::of_value(&value),
            value,
            saved_at,
        }
    }

    /// Check that the stored fingerprint still matches the value.
    pub fn verify(&self) -> Result<()> {
        if Fingerprint::of_value(&self.value) != self.fingerprint {
            return Err(Error::InvalidCacheEntry(format!(
                "fingerprint mismatch for key '{}'",
                self.key
            )));
        }
        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidCacheEntry(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidCacheEntry(e.to_string()))
    }

    /// Deserialize from JSON, checking format version and integrity.
    pub fn from_json(json: &str) -> Result<Self> {
        let entry: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidCacheEntry(e.to_string()))?;

        if entry.format_version > CACHE_FORMAT_VERSION {
            return Err(Error::UnsupportedCacheFormat {
                found: entry.format_version,
                supported: CACHE_FORMAT_VERSION,
            });
        }
        entry.verify()?;

        Ok(entry)
    }
}
