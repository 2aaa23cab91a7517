//! Configuration for sync engines.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default debounce between the last local mutation and the write.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1500);
/// Default first delay before re-subscribing after a connectivity error.
pub const DEFAULT_RECONNECT_INITIAL: Duration = Duration::from_secs(1);
/// Default ceiling for the reconnect backoff.
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Sync engine configuration, loaded from environment variables or built
/// programmatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Fixed delay after the last mutation before a write is issued
    pub debounce: Duration,
    /// First reconnect delay while the remote store is unreachable
    pub reconnect_initial: Duration,
    /// Reconnect delay ceiling; the delay doubles up to this value
    pub reconnect_max: Duration,
    /// Directory for the file-backed local cache
    pub cache_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            reconnect_initial: DEFAULT_RECONNECT_INITIAL,
            reconnect_max: DEFAULT_RECONNECT_MAX,
            cache_dir: None,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset variables take their defaults; malformed ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(name) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|_| ConfigError::InvalidDuration { name, value: raw }),
                None => Ok(default),
            }
        };

        let config = Self {
            debounce: millis("TETHER_DEBOUNCE_MS", DEFAULT_DEBOUNCE)?,
            reconnect_initial: millis("TETHER_RECONNECT_INITIAL_MS", DEFAULT_RECONNECT_INITIAL)?,
            reconnect_max: millis("TETHER_RECONNECT_MAX_MS", DEFAULT_RECONNECT_MAX)?,
            cache_dir: lookup("TETHER_CACHE_DIR")
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
        };
        config.validate()?;

        Ok(config)
    }

    /// Check that the values are usable together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect_initial.is_zero() {
            return Err(ConfigError::ZeroReconnectDelay);
        }
        if self.reconnect_max < self.reconnect_initial {
            return Err(ConfigError::ReconnectRange);
        }
        Ok(())
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_reconnect(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial = initial;
        self.reconnect_max = max;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a whole number of milliseconds, got '{value}'")]
    InvalidDuration { name: &'static str, value: String },

    #[error("reconnect delay must be greater than zero")]
    ZeroReconnectDelay,

    #[error("TETHER_RECONNECT_MAX_MS must not be below TETHER_RECONNECT_INITIAL_MS")]
    ReconnectRange,
}
