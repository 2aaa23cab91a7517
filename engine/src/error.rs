//! Error types for the Tether engine.

use thiserror::Error;

/// All possible errors from the Tether engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Payload errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    // Cache errors
    #[error("invalid cache entry: {0}")]
    InvalidCacheEntry(String),

    #[error("unsupported cache format version: {found} (max supported: {supported})")]
    UnsupportedCacheFormat { found: u32, supported: u32 },

    // Bookkeeping errors
    #[error("no write in flight")]
    WriteNotInFlight,
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
