//! UI-facing editors built on [`SyncEngine`].
//!
//! Each editor owns one engine, its own document shape, and the domain
//! operations a screen calls. None of them talk to the store directly.

pub mod dashboard;
mod numbers;
pub mod playlist;
pub mod profile;

use std::sync::Arc;

use tether_engine::{ShapeDescriptor, SyncedValue};

use crate::clock::{Clock, SystemClock};
use crate::{DocumentKey, DocumentStore, LocalCache, SyncConfig, SyncEngine};

pub use dashboard::{
    default_modules, DashboardEditor, DashboardLayout, DashboardModule, LayoutMode, ModuleSize,
};
pub use playlist::{default_categories, MusicCategory, MusicData, PlaylistEditor, Song, SongPatch, Vendor};
pub use profile::{ProfileEditor, ProgressPatch, WeddingPatch, WeddingProfile, WeddingProgress, WeddingStatus};

/// Everything an editor needs to start its engine.
#[derive(Clone)]
pub struct SyncContext {
    pub store: Arc<dyn DocumentStore>,
    pub cache: Arc<dyn LocalCache>,
    pub config: SyncConfig,
    pub clock: Arc<dyn Clock>,
}

impl SyncContext {
    pub fn new(store: Arc<dyn DocumentStore>, cache: Arc<dyn LocalCache>, config: SyncConfig) -> Self {
        Self {
            store,
            cache,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn engine<T: SyncedValue + Send + 'static>(
        &self,
        key: DocumentKey,
        initial: T,
        shape: ShapeDescriptor,
    ) -> tether_engine::Result<SyncEngine<T>> {
        SyncEngine::create_with_clock(
            initial,
            shape,
            self.store.channel(key),
            self.cache.clone(),
            self.config.clone(),
            self.clock.clone(),
        )
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
