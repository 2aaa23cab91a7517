//! # Tether Engine
//!
//! A deterministic core for keeping one user-editable document in sync with a
//! remote real-time document store.
//!
//! This crate decides; it never does IO. It tells the caller whether a local
//! edit needs writing, whether a delivered snapshot is its own echo, stale,
//! or a real change, and how to migrate an old document to today's shape.
//! Timers, channels and caches live in `tether-client`.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of network, storage, or runtime
//! - **Deterministic**: Every decision takes `now` as an argument
//! - **Causal, not timed**: Echoes are recognized by fingerprint and revision,
//!   never by a cool-down window
//!
//! ## Core Concepts
//!
//! ### Fingerprints
//!
//! A [`Fingerprint`] is a digest that ignores object key order but respects
//! list order. It is the only change detector in the engine.
//!
//! ### Shapes and Reconciliation
//!
//! A [`ShapeDescriptor`] describes the expected document. The [`Reconciler`]
//! fills in new defaults, drops retired fields and catalogue items, and
//! reports whether the result must be written back.
//!
//! ### Sync State
//!
//! [`SyncState`] holds the current value, the in-flight [`PendingWrite`] and
//! the [`SaveRecord`] of the last acknowledged write, and applies the echo
//! rule to each [`RemoteSnapshot`].
//!
//! ## Quick Start
//!
//! ```rust
//! use tether_engine::{
//!     FieldDef, FieldType, RemoteSnapshot, ShapeDescriptor, SnapshotDecision, SyncState,
//! };
//! use serde_json::json;
//!
//! let shape = ShapeDescriptor::new(1, vec![
//!     FieldDef::required("title", FieldType::String, json!("")),
//! ]);
//! let mut state = SyncState::new("notes/u1_w1", json!({"title": "Draft"}), shape).unwrap();
//!
//! // First delivery from the store ends loading.
//! let first = RemoteSnapshot::new(json!({"title": "Draft"}), 1000);
//! assert!(state.on_snapshot(first).unwrap().is_accepted());
//!
//! // Edit locally, then write once the debounce elapses.
//! state.mutate(|_| json!({"title": "Final"}), 1100).unwrap();
//! let write = state.begin_write(2600).unwrap().unwrap();
//! state.complete_write().unwrap();
//!
//! // The store echoes our own write back: it is recognized and discarded.
//! let echo = RemoteSnapshot::new(write.value, write.issued_at);
//! assert_eq!(
//!     state.on_snapshot(echo).unwrap(),
//!     SnapshotDecision::Echo { superseded: false }
//! );
//! ```

pub mod error;
pub mod fingerprint;
pub mod reconcile;
pub mod record;
pub mod revision;
pub mod shape;
pub mod snapshot;
pub mod state;

// Re-export main types at crate root
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use reconcile::{reconcile, Reconciled, Reconciler};
pub use record::{Origin, PendingMutation, PendingWrite, SaveRecord};
pub use revision::Revision;
pub use shape::{Catalogue, FieldDef, FieldType, ListShape, ObjectShape, ShapeDescriptor};
pub use snapshot::{CacheEntry, RemoteSnapshot, CACHE_FORMAT_VERSION};
pub use state::{SnapshotDecision, SyncState, SyncedValue, WriteFailure, WriteFollowUp};

/// Type aliases for clarity
pub type Timestamp = u64;
pub type SchemaVersion = u32;
