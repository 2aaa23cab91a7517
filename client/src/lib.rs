//! # Tether Client
//!
//! Async driver that keeps one in-memory value in step with a remote
//! real-time document store, built on the decisions made by
//! [`tether_engine`].
//!
//! ## Pieces
//!
//! - [`SyncEngine`]: the handle consumers hold (`mutate`, `current_state`,
//!   `subscribe`, `dispose`) and the task that drives it
//! - [`RemoteChannel`]: the document store capability it consumes
//! - [`LocalCache`]: the fallback used while the store is unreachable
//! - [`MemoryStore`]: an in-process store with fault switches
//! - [`consumers`]: dashboard, playlist and wedding profile editors
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_client::consumers::{DashboardEditor, SyncContext};
//! use tether_client::{MemoryCache, MemoryStore, SyncConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let cache = Arc::new(MemoryCache::new());
//! let ctx = SyncContext::new(store, cache, SyncConfig::default());
//!
//! let dashboard = DashboardEditor::open(&ctx, "user-1", "wedding-1", false)?;
//! dashboard.toggle_edit_mode()?;
//! assert!(dashboard.layout().is_edit_mode);
//! dashboard.dispose();
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod channel;
pub mod clock;
pub mod config;
pub mod consumers;
pub mod engine;
pub mod error;
pub mod memory;

pub use cache::{FileCache, LocalCache, MemoryCache};
pub use channel::{
    Document, DocumentKey, DocumentStore, EventSender, RemoteChannel, RemoteEvent, Subscription,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SyncConfig};
pub use engine::{ErrorListener, Listener, SyncEngine, Unsubscribe};
pub use error::{CacheError, ChannelError, SyncError};
pub use memory::{MemoryChannel, MemoryStore};

pub use tether_engine::Origin;
