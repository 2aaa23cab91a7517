//! Error types for the sync driver.

/// Errors reported by a [`RemoteChannel`](crate::RemoteChannel).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Network or availability problem. Triggers the local cache fallback.
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The store refused the document (validation, size limits, ...).
    #[error("write rejected: {0}")]
    Rejected(String),
}

impl ChannelError {
    /// Whether the error is connectivity-class and worth waiting out.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Unavailable(_))
    }
}

/// Errors reported by a [`LocalCache`](crate::LocalCache).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache entry error: {0}")]
    Entry(#[from] tether_engine::Error),
}

/// Errors surfaced to consumers through `on_error`.
///
/// None of these are fatal; local state keeps working.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A write was refused twice and dropped. Local state was kept.
    #[error("write to '{key}' failed permanently: {source}")]
    PermanentWrite { key: String, source: ChannelError },

    /// A remote document could not be decoded after reconciliation.
    #[error("snapshot for '{key}' rejected: {source}")]
    InvalidSnapshot {
        key: String,
        source: tether_engine::Error,
    },

    /// The subscription was refused for a reason other than connectivity.
    #[error("subscription to '{key}' refused: {source}")]
    Subscribe { key: String, source: ChannelError },

    #[error("local cache for '{key}' failed: {source}")]
    Cache { key: String, source: CacheError },
}

impl SyncError {
    /// Document key the error belongs to.
    pub fn key(&self) -> &str {
        match self {
            SyncError::PermanentWrite { key, .. }
            | SyncError::InvalidSnapshot { key, .. }
            | SyncError::Subscribe { key, .. }
            | SyncError::Cache { key, .. } => key,
        }
    }
}
