//! SyncState - the echo-suppression and write-eligibility state machine.
//!
//! `SyncState` owns the current value of one synced document together with
//! the bookkeeping needed to decide, event by event, what to do with it:
//!
//! - local mutations bump a [`Revision`] and mark the state dirty
//! - a write captures value, fingerprint and revision; only one is ever in
//!   flight
//! - a remote snapshot is reconciled, then checked against the in-flight
//!   write and the [`SaveRecord`] before it may replace local state
//!
//! There are no timers in here. Every method takes `now` explicitly and the
//! async driver decides when to call it.

use crate::{
    error::Result,
    record::{Origin, PendingMutation, PendingWrite, SaveRecord},
    snapshot::{CacheEntry, RemoteSnapshot},
    Error, Fingerprint, Reconciler, Revision, ShapeDescriptor, Timestamp,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Payload types that can be synced.
pub trait SyncedValue: Serialize + DeserializeOwned + Clone {}

impl<T> SyncedValue for T where T: Serialize + DeserializeOwned + Clone {}

/// What happened to a remote snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotDecision {
    /// Our own write came back. Discarded. `superseded` is true when local
    /// state has moved on since that write was issued.
    Echo { superseded: bool },
    /// Authored before our last acknowledged write. Discarded.
    Stale,
    /// Local unsynced changes are newer than the snapshot (first load or
    /// reconnection). Discarded; local state will be written instead.
    LocalWins,
    /// Replaced local state. `notify` is false when the value was already
    /// equal to local state; `write_back` is true when reconciliation added
    /// or removed anything that must be persisted.
    Accepted { notify: bool, write_back: bool },
}

impl SnapshotDecision {
    /// Whether the snapshot replaced local state.
    pub fn is_accepted(&self) -> bool {
        matches!(self, SnapshotDecision::Accepted { .. })
    }
}

/// Why a write did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFailure {
    /// Network or availability problem
    Transient,
    /// Permission denied, validation rejected, or similar
    Permanent,
}

/// What the driver should do after a write completes or fails.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteFollowUp {
    /// Nothing left to write.
    Idle,
    /// Local state moved on while the write was in flight; write again now.
    WriteAgain,
    /// Retry this exact write once.
    Retry(PendingWrite),
    /// The remote store is unreachable; fall back to the local cache.
    Offline,
    /// The write was dropped after its retry. Local state is kept and the
    /// next mutation writes again.
    GaveUp,
}

/// State of one synced document.
#[derive(Debug, Clone)]
pub struct SyncState<T> {
    key: String,
    reconciler: Reconciler,
    value: T,
    fingerprint: Fingerprint,
    revision: Revision,
    /// Fingerprint of the last value written or received
    synced: Option<Fingerprint>,
    /// Fingerprint of the last value persisted to the local cache
    cached: Option<Fingerprint>,
    pending: Option<PendingMutation>,
    in_flight: Option<PendingWrite>,
    save_record: Option<SaveRecord>,
    last_remote_timestamp: Option<Timestamp>,
    /// Writes are held at this revision after a permanent failure
    held_at: Option<Revision>,
    /// The remote document could not be read; writing local state would
    /// overwrite it blind
    remote_unreadable: bool,
    loading: bool,
    offline: bool,
}

impl<T: SyncedValue> SyncState<T> {
    /// Create state for `key`, starting from `initial` reconciled against
    /// `shape`.
    pub fn new(key: impl Into<String>, initial: T, shape: ShapeDescriptor) -> Result<Self> {
        let mut reconciler = Reconciler::new(shape);
        let reconciled = reconciler.reconcile(&serde_json::to_value(&initial)?);
        let value = decode(reconciled.value)?;

        Ok(Self {
            key: key.into(),
            reconciler,
            value,
            fingerprint: reconciled.fingerprint,
            revision: Revision::ZERO,
            synced: None,
            cached: None,
            pending: None,
            in_flight: None,
            save_record: None,
            last_remote_timestamp: None,
            held_at: None,
            remote_unreadable: false,
            loading: true,
            offline: false,
        })
    }

    /// Document key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current local value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Fingerprint of the current local value.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Revision of the latest local mutation.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Last acknowledged write, if any.
    pub fn save_record(&self) -> Option<&SaveRecord> {
        self.save_record.as_ref()
    }

    /// The write currently in flight, if any.
    pub fn in_flight(&self) -> Option<&PendingWrite> {
        self.in_flight.as_ref()
    }

    /// Local mutations not yet handed to a write.
    pub fn pending(&self) -> Option<&PendingMutation> {
        self.pending.as_ref()
    }

    /// Authoring time of the newest remote snapshot seen.
    pub fn last_remote_timestamp(&self) -> Option<Timestamp> {
        self.last_remote_timestamp
    }

    /// True until the first snapshot, confirmed absence, or fallback.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// True while the remote store is unreachable.
    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// True while writes are held because the remote document could not be
    /// read. Cleared by the next readable snapshot or confirmed absence.
    pub fn is_remote_unreadable(&self) -> bool {
        self.remote_unreadable
    }

    /// True if a write is in flight.
    pub fn is_writing(&self) -> bool {
        self.in_flight.is_some()
    }

    /// True if local state differs from what was last written or received.
    pub fn is_dirty(&self) -> bool {
        self.synced.as_ref() != Some(&self.fingerprint)
    }

    /// True if the next debounce should produce a write.
    pub fn wants_write(&self) -> bool {
        !self.loading
            && !self.remote_unreadable
            && self.held_at != Some(self.revision)
            && self.is_dirty()
    }

    /// Apply a local mutation.
    ///
    /// Always succeeds locally unless the new value cannot be serialized, in
    /// which case state is left untouched.
    pub fn mutate<F>(&mut self, updater: F, now: Timestamp) -> Result<Revision>
    where
        F: FnOnce(&T) -> T,
    {
        let next = updater(&self.value);
        let fingerprint = Fingerprint::of(&next)?;

        self.value = next;
        self.fingerprint = fingerprint;
        let revision = self.revision.tick();

        match &mut self.pending {
            Some(pending) => pending.touch(now, revision),
            None => self.pending = Some(PendingMutation::new(now, revision)),
        }
        self.held_at = None;

        Ok(revision)
    }

    /// Issue a write of the current value if one is due.
    ///
    /// Returns `None` when a write is already in flight, when loading, when
    /// writes are held after a permanent failure, or when local state already
    /// matches what was last written or received.
    pub fn begin_write(&mut self, now: Timestamp) -> Result<Option<PendingWrite>> {
        if self.in_flight.is_some() || !self.wants_write() {
            if !self.is_dirty() {
                self.pending = None;
            }
            return Ok(None);
        }

        // Save timestamps never go backwards, whatever the wall clock does.
        let issued_at = match &self.save_record {
            Some(record) => now.max(record.local_save_timestamp.saturating_add(1)),
            None => now,
        };

        let write = PendingWrite {
            value: serde_json::to_value(&self.value)?,
            fingerprint: self.fingerprint.clone(),
            revision: self.revision,
            issued_at,
            attempts: 1,
            echo_expected: true,
        };

        self.pending = None;
        self.in_flight = Some(write.clone());
        Ok(Some(write))
    }

    /// Record that the in-flight write succeeded.
    pub fn complete_write(&mut self) -> Result<WriteFollowUp> {
        let write = self.in_flight.take().ok_or(Error::WriteNotInFlight)?;

        if write.echo_expected {
            self.synced = Some(write.fingerprint.clone());
        }
        self.save_record = Some(write.to_save_record());
        self.offline = false;

        if self.wants_write() {
            Ok(WriteFollowUp::WriteAgain)
        } else {
            Ok(WriteFollowUp::Idle)
        }
    }

    /// Record that the in-flight write failed.
    pub fn fail_write(&mut self, failure: WriteFailure) -> Result<WriteFollowUp> {
        let mut write = self.in_flight.take().ok_or(Error::WriteNotInFlight)?;

        // The value never reached the store; keep it marked as unsynced.
        if self.pending.is_none() && self.is_dirty() {
            self.pending = Some(PendingMutation::new(write.issued_at, write.revision));
        }

        match failure {
            WriteFailure::Transient => {
                self.offline = true;
                Ok(WriteFollowUp::Offline)
            }
            WriteFailure::Permanent if write.attempts < 2 => {
                write.attempts += 1;
                self.in_flight = Some(write.clone());
                Ok(WriteFollowUp::Retry(write))
            }
            WriteFailure::Permanent => {
                self.held_at = Some(self.revision);
                Ok(WriteFollowUp::GaveUp)
            }
        }
    }

    /// Decide what to do with a delivered remote snapshot.
    ///
    /// Errors only when the reconciled document cannot be decoded into `T`.
    /// The snapshot is then rejected, local state and the loading and
    /// offline flags are left as they were, and writes are held until a
    /// readable snapshot arrives.
    pub fn on_snapshot(&mut self, snapshot: RemoteSnapshot) -> Result<SnapshotDecision> {
        let catching_up = self.loading || self.offline;

        let reconciled = self.reconciler.reconcile(&snapshot.value);
        let incoming = reconciled.fingerprint.clone();

        if self.is_echo(&incoming) {
            self.settle();
            return Ok(SnapshotDecision::Echo {
                superseded: self.mutated_since_last_write(),
            });
        }

        if let Some(record) = &self.save_record {
            if snapshot.remote_timestamp < record.local_save_timestamp {
                self.settle();
                return Ok(SnapshotDecision::Stale);
            }
        }

        let value = match decode(reconciled.value) {
            Ok(value) => value,
            Err(error) => {
                self.remote_unreadable = true;
                return Err(error);
            }
        };
        self.settle();
        self.remote_unreadable = false;
        self.observe_remote_timestamp(snapshot.remote_timestamp);

        if catching_up {
            if let Some(pending) = &self.pending {
                if pending.last_at > snapshot.remote_timestamp {
                    return Ok(SnapshotDecision::LocalWins);
                }
            }
        }

        let notify = incoming != self.fingerprint;

        self.value = value;
        self.fingerprint = incoming;
        self.pending = None;
        self.held_at = None;
        self.synced = if reconciled.changed {
            Some(Fingerprint::of_value(&snapshot.value))
        } else {
            Some(self.fingerprint.clone())
        };

        // The remote value is authoritative now; a later delivery of our
        // older write is a real change, not an echo.
        if notify {
            if let Some(record) = &mut self.save_record {
                record.echo_expected = false;
            }
            if let Some(write) = &mut self.in_flight {
                write.echo_expected = false;
            }
        }

        Ok(SnapshotDecision::Accepted {
            notify,
            write_back: reconciled.changed,
        })
    }

    /// The remote store confirmed that no document exists yet.
    ///
    /// Local state (defaults plus any early mutations) stays and is written
    /// to create the document.
    pub fn on_missing(&mut self) {
        self.loading = false;
        self.offline = false;
        self.synced = None;
        self.held_at = None;
        self.remote_unreadable = false;
    }

    /// The remote store became unreachable.
    pub fn mark_offline(&mut self) {
        self.offline = true;
    }

    /// End the loading phase without a remote value. Returns true the first
    /// time only.
    pub fn finish_loading(&mut self) -> bool {
        std::mem::replace(&mut self.loading, false)
    }

    /// The remote document cannot be read at all (for example the
    /// subscription was refused). Ends loading so local edits are kept, but
    /// holds writes as for an unreadable snapshot.
    pub fn mark_remote_unreadable(&mut self) -> bool {
        self.remote_unreadable = true;
        self.finish_loading()
    }

    /// Load a cached value while offline.
    ///
    /// Applied only if it is newer than anything seen from the remote store
    /// and than any local mutation. Returns whether local state changed.
    pub fn restore_from_cache(&mut self, entry: CacheEntry) -> Result<bool> {
        entry.verify()?;

        let newer_than_remote = self
            .last_remote_timestamp
            .map_or(true, |ts| entry.saved_at > ts);
        let newer_than_local = self
            .pending
            .as_ref()
            .map_or(true, |p| entry.saved_at > p.last_at);
        if !newer_than_remote || !newer_than_local {
            return Ok(false);
        }

        let reconciled = self.reconciler.reconcile(&entry.value);
        let value = decode(reconciled.value)?;
        let changed = reconciled.fingerprint != self.fingerprint;

        self.value = value;
        self.fingerprint = reconciled.fingerprint;
        self.cached = Some(entry.fingerprint);
        // Cached edits never reached the store.
        self.pending = Some(PendingMutation::new(entry.saved_at, self.revision));

        Ok(changed)
    }

    /// A cache entry for the current value, unless it is already cached.
    pub fn cache_entry(&mut self, now: Timestamp) -> Result<Option<CacheEntry>> {
        if self.cached.as_ref() == Some(&self.fingerprint) {
            return Ok(None);
        }

        let entry = CacheEntry::new(self.key.clone(), serde_json::to_value(&self.value)?, now);
        self.cached = Some(entry.fingerprint.clone());
        Ok(Some(entry))
    }

    /// Origin to report for a change produced by `decision`.
    pub fn origin_of(decision: SnapshotDecision) -> Option<Origin> {
        match decision {
            SnapshotDecision::Accepted { notify: true, .. } => Some(Origin::Remote),
            _ => None,
        }
    }

    fn settle(&mut self) {
        self.loading = false;
        self.offline = false;
    }

    fn is_echo(&self, incoming: &Fingerprint) -> bool {
        let in_flight = self
            .in_flight
            .as_ref()
            .is_some_and(|w| w.echo_expected && &w.fingerprint == incoming);
        let saved = self
            .save_record
            .as_ref()
            .is_some_and(|r| r.echo_expected && &r.fingerprint == incoming);
        in_flight || saved
    }

    fn mutated_since_last_write(&self) -> bool {
        let written = self
            .in_flight
            .as_ref()
            .map(|w| w.revision)
            .or_else(|| self.save_record.as_ref().map(|r| r.revision));
        written.is_some_and(|rev| rev.happened_before(&self.revision))
    }

    fn observe_remote_timestamp(&mut self, ts: Timestamp) {
        self.last_remote_timestamp = Some(self.last_remote_timestamp.map_or(ts, |seen| seen.max(ts)));
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::InvalidPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldDef, FieldType, ListShape, ObjectShape};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Module {
        id: String,
        is_visible: bool,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Layout {
        modules: Vec<Module>,
    }

    fn m(id: &str) -> Module {
        Module {
            id: id.into(),
            is_visible: true,
        }
    }

    fn shape(catalogue: &[&str]) -> ShapeDescriptor {
        let item = ObjectShape::new(vec![
            FieldDef::required("id", FieldType::String, json!("")),
            FieldDef::required("isVisible", FieldType::Bool, json!(true)),
        ]);
        let defaults = catalogue
            .iter()
            .map(|id| json!({"id": id, "isVisible": true}))
            .collect();
        ShapeDescriptor::new(1, vec![FieldDef::list("modules", ListShape::keyed("id", item, defaults))])
    }

    fn layout(ids: &[&str]) -> Layout {
        Layout {
            modules: ids.iter().map(|id| m(id)).collect(),
        }
    }

    fn loaded_state(ids: &[&str]) -> SyncState<Layout> {
        let mut state = SyncState::new("dashboard/u1_w1", layout(ids), shape(ids)).unwrap();
        let snapshot = RemoteSnapshot::new(serde_json::to_value(layout(ids)).unwrap(), 100);
        let decision = state.on_snapshot(snapshot).unwrap();
        assert_eq!(decision, SnapshotDecision::Accepted { notify: false, write_back: false });
        state
    }

    fn reorder(layout: &Layout) -> Layout {
        let mut next = layout.clone();
        next.modules.reverse();
        next
    }

    #[test]
    fn new_state_is_loading_and_reconciled() {
        let state = SyncState::new("k", layout(&["a"]), shape(&["a", "b"])).unwrap();
        assert!(state.is_loading());
        assert_eq!(state.value(), &layout(&["a", "b"]));
        assert!(!state.wants_write());
    }

    #[test]
    fn mutate_applies_in_order_and_bumps_revision() {
        let mut state = loaded_state(&["a", "b"]);

        let r1 = state.mutate(reorder, 200).unwrap();
        let r2 = state
            .mutate(
                |l| {
                    let mut next = l.clone();
                    next.modules[1].is_visible = false;
                    next
                },
                250,
            )
            .unwrap();

        assert!(r1 < r2);
        assert_eq!(
            state.value().modules,
            vec![m("b"), Module { id: "a".into(), is_visible: false }]
        );
        let pending = state.pending().unwrap();
        assert_eq!((pending.since, pending.last_at), (200, 250));
        assert!(state.wants_write());
    }

    #[test]
    fn coalesced_mutations_produce_one_write() {
        let mut state = loaded_state(&["a", "b"]);
        state.mutate(reorder, 200).unwrap();
        state
            .mutate(
                |l| {
                    let mut next = l.clone();
                    next.modules[1].is_visible = false;
                    next
                },
                210,
            )
            .unwrap();

        let write = state.begin_write(1700).unwrap().unwrap();
        assert_eq!(
            write.value,
            json!({"modules": [{"id": "b", "isVisible": true}, {"id": "a", "isVisible": false}]})
        );
        assert!(state.begin_write(1701).unwrap().is_none(), "single writer in flight");

        assert_eq!(state.complete_write().unwrap(), WriteFollowUp::Idle);
        assert!(state.begin_write(3000).unwrap().is_none());
    }

    #[test]
    fn no_write_when_value_returns_to_synced() {
        let mut state = loaded_state(&["a", "b"]);
        state.mutate(reorder, 200).unwrap();
        state.mutate(reorder, 300).unwrap();

        assert!(!state.wants_write());
        assert!(state.begin_write(2000).unwrap().is_none());
        assert!(state.pending().is_none());
    }

    #[test]
    fn echo_is_discarded_without_timing_window() {
        let mut state = loaded_state(&["a", "b"]);
        state.mutate(reorder, 0).unwrap();
        let write = state.begin_write(0).unwrap().unwrap();

        // Echo delivered 50ms later, before the write is even acknowledged.
        let echo = RemoteSnapshot::new(write.value.clone(), write.issued_at);
        assert_eq!(
            state.on_snapshot(echo.clone()).unwrap(),
            SnapshotDecision::Echo { superseded: false }
        );

        state.complete_write().unwrap();
        assert_eq!(
            state.on_snapshot(echo).unwrap(),
            SnapshotDecision::Echo { superseded: false }
        );
        assert_eq!(state.value(), &layout(&["b", "a"]));
    }

    #[test]
    fn echo_of_superseded_write_keeps_newer_local_state() {
        let mut state = loaded_state(&["a", "b"]);
        state.mutate(reorder, 10).unwrap();
        let write = state.begin_write(20).unwrap().unwrap();

        state
            .mutate(
                |l| {
                    let mut next = l.clone();
                    next.modules[0].is_visible = false;
                    next
                },
                30,
            )
            .unwrap();

        let echo = RemoteSnapshot::new(write.value.clone(), write.issued_at);
        assert_eq!(
            state.on_snapshot(echo).unwrap(),
            SnapshotDecision::Echo { superseded: true }
        );
        assert!(!state.value().modules[0].is_visible);

        // The newer mutation is written as soon as the first write lands.
        assert_eq!(state.complete_write().unwrap(), WriteFollowUp::WriteAgain);
        let second = state.begin_write(40).unwrap().unwrap();
        assert_eq!(second.value["modules"][0]["isVisible"], json!(false));
        assert!(second.issued_at > write.issued_at);
    }

    #[test]
    fn stale_snapshot_is_discarded() {
        let mut state = loaded_state(&["a", "b"]);
        state.mutate(reorder, 500).unwrap();
        state.begin_write(500).unwrap().unwrap();
        state.complete_write().unwrap();

        let old = RemoteSnapshot::new(json!({"modules": [{"id": "a", "isVisible": false}]}), 499);
        assert_eq!(state.on_snapshot(old).unwrap(), SnapshotDecision::Stale);
        assert_eq!(state.value(), &layout(&["b", "a"]));
    }

    #[test]
    fn external_change_is_accepted_and_not_written_back() {
        let mut state = loaded_state(&["a", "b"]);
        let external = RemoteSnapshot::new(serde_json::to_value(layout(&["b", "a"])).unwrap(), 900);

        assert_eq!(
            state.on_snapshot(external).unwrap(),
            SnapshotDecision::Accepted { notify: true, write_back: false }
        );
        assert_eq!(state.value(), &layout(&["b", "a"]));
        assert!(!state.wants_write());
        assert_eq!(state.last_remote_timestamp(), Some(900));
    }

    #[test]
    fn external_change_wins_over_dirty_local_state() {
        let mut state = loaded_state(&["a", "b"]);
        state
            .mutate(
                |l| {
                    let mut next = l.clone();
                    next.modules[0].is_visible = false;
                    next
                },
                200,
            )
            .unwrap();

        let external = RemoteSnapshot::new(serde_json::to_value(layout(&["b", "a"])).unwrap(), 150);
        assert!(state.on_snapshot(external).unwrap().is_accepted());
        assert_eq!(state.value(), &layout(&["b", "a"]));
        assert!(state.pending().is_none());
        assert!(!state.wants_write());
    }

    #[test]
    fn reconciliation_additions_request_write_back() {
        let mut state = SyncState::new("k", layout(&["a", "b", "c"]), shape(&["a", "b", "c"])).unwrap();
        let raw = json!({
            "modules": [{"id": "a", "isVisible": true}, {"id": "b", "isVisible": true}],
            "extra_removed_field": 1
        });

        let decision = state.on_snapshot(RemoteSnapshot::new(raw, 100)).unwrap();
        assert_eq!(decision, SnapshotDecision::Accepted { notify: false, write_back: true });
        assert!(!state.is_loading());
        assert!(state.wants_write());

        let write = state.begin_write(200).unwrap().unwrap();
        assert_eq!(write.value, serde_json::to_value(layout(&["a", "b", "c"])).unwrap());
        assert_eq!(state.complete_write().unwrap(), WriteFollowUp::Idle);

        // Its echo, which reconciles to itself, is ours.
        let echo = RemoteSnapshot::new(write.value, write.issued_at);
        assert!(matches!(state.on_snapshot(echo).unwrap(), SnapshotDecision::Echo { .. }));
        assert!(!state.wants_write());
    }

    #[test]
    fn accepted_remote_value_unarms_older_write_echo() {
        let mut state = loaded_state(&["a", "b"]);
        state.mutate(reorder, 100).unwrap();
        let write = state.begin_write(100).unwrap().unwrap();

        // Someone else wrote before our write landed.
        let external = RemoteSnapshot::new(json!({"modules": [{"id": "a", "isVisible": false}, {"id": "b", "isVisible": true}]}), 101);
        assert!(state.on_snapshot(external).unwrap().is_accepted());
        assert_eq!(state.complete_write().unwrap(), WriteFollowUp::Idle);

        // Our write landed last, so the store holds it: accept it.
        let ours = RemoteSnapshot::new(write.value.clone(), write.issued_at);
        assert_eq!(
            state.on_snapshot(ours).unwrap(),
            SnapshotDecision::Accepted { notify: true, write_back: false }
        );
        assert_eq!(state.value(), &layout(&["b", "a"]));
    }

    #[test]
    fn writes_held_while_loading() {
        let mut state = SyncState::new("k", layout(&["a"]), shape(&["a"])).unwrap();
        state.mutate(|l| l.clone(), 10).unwrap();
        state.mutate(reorder, 10).unwrap();
        assert!(state.begin_write(10).unwrap().is_none());
    }

    #[test]
    fn missing_document_is_created_from_local_state() {
        let mut state = SyncState::new("k", layout(&["a"]), shape(&["a", "b"])).unwrap();
        state.on_missing();
        assert!(!state.is_loading());
        let write = state.begin_write(5).unwrap().unwrap();
        assert_eq!(write.value, serde_json::to_value(layout(&["a", "b"])).unwrap());
    }

    #[test]
    fn early_local_edit_wins_over_older_first_snapshot() {
        let mut state = SyncState::new("k", layout(&["a", "b"]), shape(&["a", "b"])).unwrap();
        state.mutate(reorder, 500).unwrap();

        let first = RemoteSnapshot::new(serde_json::to_value(layout(&["a", "b"])).unwrap(), 400);
        assert_eq!(state.on_snapshot(first).unwrap(), SnapshotDecision::LocalWins);
        assert_eq!(state.value(), &layout(&["b", "a"]));
        assert!(state.wants_write());
    }

    #[test]
    fn transient_failure_goes_offline_and_keeps_pending() {
        let mut state = loaded_state(&["a", "b"]);
        state.mutate(reorder, 100).unwrap();
        state.begin_write(100).unwrap().unwrap();

        assert_eq!(state.fail_write(WriteFailure::Transient).unwrap(), WriteFollowUp::Offline);
        assert!(state.is_offline());
        assert!(!state.is_writing());
        assert!(state.pending().is_some());
        assert!(state.wants_write());
    }

    #[test]
    fn permanent_failure_retries_once_then_holds() {
        let mut state = loaded_state(&["a", "b"]);
        state.mutate(reorder, 100).unwrap();
        state.begin_write(100).unwrap().unwrap();

        let retry = state.fail_write(WriteFailure::Permanent).unwrap();
        assert!(matches!(retry, WriteFollowUp::Retry(ref w) if w.attempts == 2));
        assert!(state.is_writing());

        assert_eq!(state.fail_write(WriteFailure::Permanent).unwrap(), WriteFollowUp::GaveUp);
        assert_eq!(state.value(), &layout(&["b", "a"]), "local state is not rolled back");
        assert!(!state.wants_write());
        assert!(state.begin_write(200).unwrap().is_none());

        // The next mutation writes normally again.
        state.mutate(reorder, 300).unwrap();
        state.mutate(reorder, 301).unwrap();
        assert!(state.wants_write());
        assert!(state.begin_write(302).unwrap().is_some());
    }

    #[test]
    fn complete_without_write_is_an_error() {
        let mut state = loaded_state(&["a"]);
        assert_eq!(state.complete_write(), Err(Error::WriteNotInFlight));
        assert_eq!(state.fail_write(WriteFailure::Transient), Err(Error::WriteNotInFlight));
    }

    #[test]
    fn offline_edits_are_cached_once_per_value() {
        let mut state = loaded_state(&["a", "b"]);
        state.mark_offline();
        state.mutate(reorder, 100).unwrap();

        let entry = state.cache_entry(1600).unwrap().unwrap();
        assert_eq!(entry.key, "dashboard/u1_w1");
        assert_eq!(entry.saved_at, 1600);
        assert!(state.cache_entry(1700).unwrap().is_none());
    }

    #[test]
    fn reconnect_prefers_newer_offline_edits() {
        let mut state = loaded_state(&["a", "b"]);
        state.mark_offline();
        state.mutate(reorder, 2000).unwrap();

        let remote = RemoteSnapshot::new(serde_json::to_value(layout(&["a", "b"])).unwrap(), 1500);
        assert_eq!(state.on_snapshot(remote).unwrap(), SnapshotDecision::LocalWins);
        assert!(!state.is_offline());
        assert!(state.wants_write());
    }

    #[test]
    fn reconnect_prefers_newer_remote_value() {
        let mut state = loaded_state(&["a", "b"]);
        state.mark_offline();
        state.mutate(reorder, 2000).unwrap();

        let remote = RemoteSnapshot::new(
            json!({"modules": [{"id": "a", "isVisible": false}, {"id": "b", "isVisible": true}]}),
            2500,
        );
        assert!(state.on_snapshot(remote).unwrap().is_accepted());
        assert!(!state.value().modules[0].is_visible);
        assert!(!state.wants_write());
    }

    #[test]
    fn cache_restore_only_when_newer() {
        let mut state = SyncState::new("k", layout(&["a", "b"]), shape(&["a", "b"])).unwrap();
        let cached = CacheEntry::new("k", serde_json::to_value(layout(&["b", "a"])).unwrap(), 700);

        assert!(state.restore_from_cache(cached.clone()).unwrap());
        assert_eq!(state.value(), &layout(&["b", "a"]));
        assert_eq!(state.pending().unwrap().last_at, 700);

        // Seen a newer remote value: an old cache entry must not win.
        let mut fresh = loaded_state(&["a", "b"]);
        fresh
            .on_snapshot(RemoteSnapshot::new(json!({"modules": [{"id": "b", "isVisible": false}]}), 800))
            .unwrap();
        assert!(!fresh.restore_from_cache(cached).unwrap());
    }

    #[test]
    fn undecodable_snapshot_is_rejected() {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Strict {
            count: u8,
        }
        let shape = ShapeDescriptor::new(1, vec![FieldDef::required("count", FieldType::Number, json!(0))]);
        let mut state = SyncState::new("k", Strict { count: 1 }, shape).unwrap();

        let result = state.on_snapshot(RemoteSnapshot::new(json!({"count": 1000}), 10));
        assert!(matches!(result, Err(Error::InvalidPayload(_))));
        assert_eq!(state.value().count, 1);
        assert!(state.is_loading());
        assert!(state.is_remote_unreadable());
    }

    #[test]
    fn unreadable_snapshot_holds_writes_until_readable() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct Party {
            name: String,
            guests: u32,
        }
        let shape = ShapeDescriptor::new(
            1,
            vec![
                FieldDef::required("name", FieldType::String, json!("")),
                FieldDef::required("guests", FieldType::Number, json!(0)),
            ],
        );
        let initial = Party {
            name: String::new(),
            guests: 0,
        };
        let mut state = SyncState::new("k", initial, shape).unwrap();

        // The stored document says 120.5 guests; nothing local may replace it.
        assert!(state
            .on_snapshot(RemoteSnapshot::new(json!({"name": "Jana", "guests": 120.5}), 100))
            .is_err());
        state
            .mutate(
                |p| Party {
                    name: "Petr".into(),
                    ..p.clone()
                },
                200,
            )
            .unwrap();
        assert!(!state.wants_write());
        assert_eq!(state.begin_write(300).unwrap(), None);
        assert!(state.pending().is_some());

        // Also after loading: a later unreadable snapshot holds writes again.
        let decision = state
            .on_snapshot(RemoteSnapshot::new(json!({"name": "Jana", "guests": 120}), 400))
            .unwrap();
        assert!(decision.is_accepted());
        assert!(!state.is_loading());
        assert_eq!(state.value().guests, 120);

        state.mutate(|p| Party { guests: 121, ..p.clone() }, 500).unwrap();
        assert!(state.wants_write());
        assert!(state
            .on_snapshot(RemoteSnapshot::new(json!({"name": "Jana", "guests": -3.5}), 600))
            .is_err());
        assert!(!state.wants_write());
        assert!(!state.is_loading());

        // A document that turns out to be missing may be created again.
        state.on_missing();
        assert!(state.wants_write());
    }

    #[test]
    fn refused_subscription_keeps_edits_unwritten() {
        let mut state = SyncState::new("k", layout(&["a", "b"]), shape(&["a", "b"])).unwrap();
        assert!(state.mark_remote_unreadable());
        assert!(!state.is_loading());

        state.mutate(|_| layout(&["b", "a"]), 10).unwrap();
        assert!(!state.wants_write());
        assert_eq!(state.begin_write(20).unwrap(), None);
        assert!(state.cache_entry(20).unwrap().is_some());
    }

    #[test]
    fn finish_loading_reports_once() {
        let mut state = SyncState::new("k", layout(&["a"]), shape(&["a"])).unwrap();
        assert!(state.finish_loading());
        assert!(!state.finish_loading());
    }

    #[test]
    fn origin_of_decision() {
        assert_eq!(
            SyncState::<Layout>::origin_of(SnapshotDecision::Accepted { notify: true, write_back: false }),
            Some(Origin::Remote)
        );
        assert_eq!(SyncState::<Layout>::origin_of(SnapshotDecision::Stale), None);
    }
}
