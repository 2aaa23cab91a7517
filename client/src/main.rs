//! Tether demo - drives the editors against an in-process store.
//!
//! Opens a dashboard, a playlist and a wedding profile, edits them, takes
//! the store offline for a while and brings it back, logging what the sync
//! engines do along the way. Set `RUST_LOG=tether_client=trace` for the
//! full picture.

use std::sync::Arc;

use tether_client::consumers::{
    DashboardEditor, LayoutMode, PlaylistEditor, ProfileEditor, ProgressPatch, Song, SyncContext,
    WeddingPatch, WeddingStatus,
};
use tether_client::{
    Clock, FileCache, LocalCache, MemoryCache, MemoryStore, Origin, SyncConfig, SystemClock,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USER_ID: &str = "demo-user";
const WEDDING_ID: &str = "wedding-1";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether_client=debug,tether_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = SyncConfig::from_env()?;

    let cache: Arc<dyn LocalCache> = match &config.cache_dir {
        Some(dir) => {
            tracing::info!("Caching documents under {}", dir.display());
            Arc::new(FileCache::new(dir))
        }
        None => Arc::new(MemoryCache::new()),
    };
    let store = MemoryStore::new();
    let ctx = SyncContext::new(Arc::new(store.clone()), cache, config.clone());

    let dashboard = DashboardEditor::open(&ctx, USER_ID, WEDDING_ID, false)?;
    let playlist = PlaylistEditor::open(&ctx, USER_ID, WEDDING_ID)?;
    let profile = ProfileEditor::open(&ctx, USER_ID, WEDDING_ID)?;

    let watch = dashboard.engine().subscribe(|layout, origin| {
        if origin != Origin::Local {
            tracing::info!(?origin, modules = layout.modules.len(), "dashboard changed");
        }
    });
    let _errors = profile.engine().on_error(|error| {
        tracing::error!(%error, "profile sync failed");
    });

    let mut loading = dashboard.engine().loading();
    loading.wait_for(|loading| !loading).await?;
    tracing::info!("Dashboard loaded");

    // A burst of edits becomes one write per document.
    dashboard.toggle_edit_mode()?;
    dashboard.set_layout_mode(LayoutMode::Free)?;
    dashboard.update_module_order(&["guest-management", "budget-tracking"])?;
    playlist.add_song("first-dance", Song::new("Perfect", "Ed Sheeran"))?;
    profile.update(WeddingPatch {
        bride_name: Some("Jana".into()),
        groom_name: Some("Petr".into()),
        status: Some(WeddingStatus::Booked),
        ..Default::default()
    })?;
    tokio::time::sleep(config.debounce * 2).await;

    // Edits made while the store is away are cached and written on reconnect.
    store.set_online(false);
    profile.update_progress(ProgressPatch {
        foundation: Some(100),
        venue: Some(60),
        ..Default::default()
    })?;
    playlist.add_song("bride-entrance", Song::new("A Thousand Years", "Christina Perri"))?;
    tokio::time::sleep(config.debounce * 2).await;

    store.set_online(true);
    tokio::time::sleep(config.reconnect_max.min(config.reconnect_initial * 4)).await;
    tokio::time::sleep(config.debounce * 2).await;

    // Another client edits the playlist.
    let mut remote = serde_json::to_value(playlist.music())?;
    remote["vendor"]["name"] = "DJ Remote".into();
    let key = playlist.engine().key().to_string();
    store.put_external(&key, remote, SystemClock.now_ms());
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    tracing::info!(
        songs = playlist.total_songs(),
        required_done = playlist.completed_required(),
        vendor = %playlist.music().vendor.name,
        overall = profile.profile().progress.overall,
        visible_modules = dashboard.visible_modules().len(),
        "Final state"
    );
    for engine_key in [
        dashboard.engine().key().to_string(),
        key,
        profile.engine().key().to_string(),
    ] {
        tracing::info!(key = %engine_key, writes = store.write_log(&engine_key).len(), "Write log");
    }

    watch.unsubscribe();
    dashboard.dispose();
    playlist.dispose();
    profile.dispose();

    // Give the dispose flushes a moment before the runtime stops.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    Ok(())
}
