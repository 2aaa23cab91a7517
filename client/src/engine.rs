//! SyncEngine - the async driver around [`SyncState`].
//!
//! A [`SyncEngine`] is the handle consumers hold. Local mutations are applied
//! on the caller's thread and listeners are notified before `mutate` returns.
//! Listeners see changes in the order they were applied to state, whichever
//! thread applied them.
//! Everything else happens on a driver task that reacts to four kinds of
//! event, one at a time:
//!
//! - commands from the handle (a mutation happened, dispose)
//! - events from the remote subscription
//! - completion of the single in-flight write
//! - the debounce and reconnect timers
//!
//! The driver never decides anything itself; it asks [`SyncState`] and
//! carries out the answer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tether_engine::{
    Origin, PendingWrite, Revision, ShapeDescriptor, SnapshotDecision, SyncState, SyncedValue,
    WriteFailure, WriteFollowUp,
};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::cache::LocalCache;
use crate::channel::{Document, DocumentKey, RemoteChannel, RemoteEvent, Subscription};
use crate::clock::{Clock, SystemClock};
use crate::{CacheError, ChannelError, SyncConfig, SyncError};

/// Called with the new value after every local mutation and every accepted
/// remote change.
pub type Listener<T> = Arc<dyn Fn(&T, Origin) + Send + Sync>;

/// Called with every error surfaced to the consumer.
pub type ErrorListener = Arc<dyn Fn(&SyncError) + Send + Sync>;

type WriteResult = Result<(), ChannelError>;

#[derive(Debug)]
enum Command {
    Mutated,
    Dispose,
}

/// State shared between the handle and the driver task.
struct Shared<T> {
    key: DocumentKey,
    state: Mutex<SyncState<T>>,
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
    /// Changes waiting for delivery, in state order
    outbox: Mutex<VecDeque<(T, Origin)>>,
    delivering: AtomicBool,
    error_listeners: Mutex<Vec<(u64, ErrorListener)>>,
    next_listener_id: AtomicU64,
    loading: watch::Sender<bool>,
    clock: Arc<dyn Clock>,
}

fn lock<M>(mutex: &Mutex<M>) -> MutexGuard<'_, M> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: SyncedValue> Shared<T> {
    /// Queue a change for listeners. Call with the state lock held so the
    /// queue follows the order changes were applied in.
    fn enqueue(&self, value: T, origin: Origin) {
        lock(&self.outbox).push_back((value, origin));
    }

    /// Deliver queued changes in order.
    ///
    /// One caller delivers at a time. A caller that finds delivery under way
    /// (on another thread, or a listener mutating from inside a callback)
    /// leaves its change to the active deliverer.
    fn deliver(&self) {
        loop {
            if self.delivering.swap(true, Ordering::Acquire) {
                return;
            }
            loop {
                let next = lock(&self.outbox).pop_front();
                let Some((value, origin)) = next else { break };
                self.notify(&value, origin);
            }
            self.delivering.store(false, Ordering::Release);

            // A change queued between the last pop and the release.
            if lock(&self.outbox).is_empty() {
                return;
            }
        }
    }

    fn notify(&self, value: &T, origin: Origin) {
        let listeners: Vec<Listener<T>> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(value, origin);
        }
    }

    fn report(&self, error: SyncError) {
        let listeners: Vec<ErrorListener> = lock(&self.error_listeners)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&error);
        }
    }

    /// Flip `loading` to false. Only the first call has any effect.
    fn loaded(&self) {
        let changed = self
            .loading
            .send_if_modified(|loading| std::mem::replace(loading, false));
        if changed {
            tracing::info!(key = %self.key, "document loaded");
        }
    }

    fn value(&self) -> T {
        lock(&self.state).value().clone()
    }
}

/// Removes a listener registered with [`SyncEngine::subscribe`] or
/// [`SyncEngine::on_error`]. Dropping it leaves the listener in place.
pub struct Unsubscribe {
    remove: Box<dyn FnOnce() + Send>,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        (self.remove)();
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Unsubscribe")
    }
}

/// Handle to one synced document.
///
/// Dropping the handle disposes the engine.
pub struct SyncEngine<T> {
    shared: Arc<Shared<T>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl<T> std::fmt::Debug for SyncEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("key", &self.shared.key)
            .finish_non_exhaustive()
    }
}

impl<T: SyncedValue + Send + 'static> SyncEngine<T> {
    /// Start syncing `channel`'s document, starting from `initial`.
    ///
    /// `initial` is reconciled against `shape` and served until the remote
    /// store answers.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create(
        initial: T,
        shape: ShapeDescriptor,
        channel: Arc<dyn RemoteChannel>,
        cache: Arc<dyn LocalCache>,
        config: SyncConfig,
    ) -> tether_engine::Result<Self> {
        Self::create_with_clock(initial, shape, channel, cache, config, Arc::new(SystemClock))
    }

    /// Like [`SyncEngine::create`], with an explicit timestamp source.
    pub fn create_with_clock(
        initial: T,
        shape: ShapeDescriptor,
        channel: Arc<dyn RemoteChannel>,
        cache: Arc<dyn LocalCache>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> tether_engine::Result<Self> {
        let key = channel.key().clone();
        let state = SyncState::new(key.to_string(), initial, shape)?;
        let (loading, _) = watch::channel(true);

        let shared = Arc::new(Shared {
            key,
            state: Mutex::new(state),
            listeners: Mutex::new(Vec::new()),
            outbox: Mutex::new(VecDeque::new()),
            delivering: AtomicBool::new(false),
            error_listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
            loading,
            clock,
        });

        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (done_tx, done) = mpsc::unbounded_channel();

        let driver = Driver {
            shared: shared.clone(),
            channel,
            cache,
            backoff: config.reconnect_initial,
            config,
            commands,
            events_tx,
            events,
            done_tx,
            done,
            subscription: None,
            writing: false,
            fallback: false,
            debounce_at: None,
            reconnect_at: None,
        };
        tokio::spawn(driver.run());

        Ok(Self {
            shared,
            commands: commands_tx,
        })
    }

    /// Apply `updater` to local state.
    ///
    /// Listeners see the new value before this returns, unless another
    /// change is being delivered at that moment; that delivery then carries
    /// this one too, in order. The write follows after the debounce delay.
    pub fn mutate<F>(&self, updater: F) -> tether_engine::Result<Revision>
    where
        F: FnOnce(&T) -> T,
    {
        let now = self.shared.clock.now_ms();
        let revision = {
            let mut state = lock(&self.shared.state);
            let revision = state.mutate(updater, now)?;
            self.shared.enqueue(state.value().clone(), Origin::Local);
            revision
        };

        tracing::trace!(key = %self.shared.key, %revision, "local mutation");
        self.shared.deliver();
        let _ = self.commands.send(Command::Mutated);

        Ok(revision)
    }

    /// The latest local value.
    pub fn current_state(&self) -> T {
        self.shared.value()
    }

    /// Register a change listener.
    pub fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&T, Origin) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.listeners).push((id, Arc::new(listener)));

        let shared: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        Unsubscribe {
            remove: Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    lock(&shared.listeners).retain(|(other, _)| *other != id);
                }
            }),
        }
    }

    /// Register an error listener.
    pub fn on_error<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&SyncError) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.error_listeners).push((id, Arc::new(listener)));

        let shared: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        Unsubscribe {
            remove: Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    lock(&shared.error_listeners).retain(|(other, _)| *other != id);
                }
            }),
        }
    }

    /// Observable loading flag. Starts `true` and turns `false` exactly once.
    pub fn loading(&self) -> watch::Receiver<bool> {
        self.shared.loading.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        *self.shared.loading.borrow()
    }

    /// True while the remote store is unreachable.
    pub fn is_offline(&self) -> bool {
        lock(&self.shared.state).is_offline()
    }

    /// True if local state has changes not yet written.
    pub fn is_dirty(&self) -> bool {
        lock(&self.shared.state).is_dirty()
    }

    /// Revision of the latest local mutation.
    pub fn revision(&self) -> Revision {
        lock(&self.shared.state).revision()
    }

    pub fn key(&self) -> &DocumentKey {
        &self.shared.key
    }

    /// Stop syncing. A pending change is flushed without waiting for the
    /// debounce; nothing waits for that write to finish.
    pub fn dispose(self) {
        let _ = self.commands.send(Command::Dispose);
    }
}

/// The driver task. Owns timers, the subscription and the in-flight write.
struct Driver<T> {
    shared: Arc<Shared<T>>,
    channel: Arc<dyn RemoteChannel>,
    cache: Arc<dyn LocalCache>,
    config: SyncConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<RemoteEvent>,
    events: mpsc::UnboundedReceiver<RemoteEvent>,
    done_tx: mpsc::UnboundedSender<WriteResult>,
    done: mpsc::UnboundedReceiver<WriteResult>,
    subscription: Option<Subscription>,
    writing: bool,
    /// Serving from the local cache until the subscription is back
    fallback: bool,
    debounce_at: Option<Instant>,
    reconnect_at: Option<Instant>,
    backoff: Duration,
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<T: SyncedValue + Send + 'static> Driver<T> {
    async fn run(mut self) {
        tracing::info!(key = %self.shared.key, "sync engine started");
        self.connect().await;

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Mutated) => self.on_mutated(),
                    Some(Command::Dispose) | None => break,
                },
                Some(event) = self.events.recv() => self.on_event(event).await,
                Some(result) = self.done.recv() => self.on_write_done(result).await,
                _ = sleep_until(self.debounce_at) => {
                    self.debounce_at = None;
                    self.flush().await;
                }
                _ = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.connect().await;
                }
            }
        }

        self.shutdown().await;
    }

    async fn connect(&mut self) {
        self.subscription = None;

        match self.channel.subscribe(self.events_tx.clone()).await {
            Ok(subscription) => {
                tracing::debug!(key = %self.shared.key, "subscribed");
                self.subscription = Some(subscription);
            }
            Err(error) if error.is_transient() => self.enter_fallback(&error).await,
            Err(error) => {
                tracing::error!(key = %self.shared.key, %error, "subscription refused, keeping edits in the local cache");
                lock(&self.shared.state).mark_remote_unreadable();
                self.shared.report(SyncError::Subscribe {
                    key: self.shared.key.to_string(),
                    source: error,
                });
                self.shared.loaded();
            }
        }
    }

    fn on_mutated(&mut self) {
        // An in-flight write reschedules on completion.
        if !self.writing {
            self.debounce_at = Some(Instant::now() + self.config.debounce);
        }
    }

    async fn on_event(&mut self, event: RemoteEvent) {
        if self.subscription.is_none() {
            tracing::trace!(key = %self.shared.key, "event from closed subscription ignored");
            return;
        }

        match event {
            RemoteEvent::Snapshot(doc) => self.on_snapshot(doc).await,
            RemoteEvent::Missing => {
                self.reconnected();
                lock(&self.shared.state).on_missing();
                tracing::info!(key = %self.shared.key, "no remote document, creating it from local state");
                self.shared.loaded();
                self.flush().await;
            }
            RemoteEvent::Error(error) if error.is_transient() => self.enter_fallback(&error).await,
            RemoteEvent::Error(error) => {
                tracing::error!(key = %self.shared.key, %error, "subscription closed by remote store");
                self.subscription = None;
                lock(&self.shared.state).mark_remote_unreadable();
                self.shared.report(SyncError::Subscribe {
                    key: self.shared.key.to_string(),
                    source: error,
                });
                self.shared.loaded();
            }
        }
    }

    async fn on_snapshot(&mut self, doc: Document) {
        let reconnected = self.reconnected();
        let remote_timestamp = doc.updated_at;

        let decision = {
            let mut state = lock(&self.shared.state);
            let decision = state.on_snapshot(doc.into());
            if let Ok(SnapshotDecision::Accepted { notify: true, .. }) = decision {
                self.shared.enqueue(state.value().clone(), Origin::Remote);
            }
            decision
        };
        self.shared.loaded();

        let key = &self.shared.key;
        let mut write = reconnected;
        match decision {
            Ok(SnapshotDecision::Echo { superseded }) => {
                tracing::debug!(key = %key, superseded, "echo discarded");
            }
            Ok(SnapshotDecision::Stale) => {
                tracing::debug!(key = %key, remote_timestamp, "stale snapshot discarded");
            }
            Ok(SnapshotDecision::LocalWins) => {
                tracing::debug!(key = %key, remote_timestamp, "local changes are newer, keeping them");
                write = true;
            }
            Ok(SnapshotDecision::Accepted { notify, write_back }) => {
                tracing::debug!(key = %key, remote_timestamp, notify, write_back, "snapshot accepted");
                self.shared.deliver();
                write |= write_back;
            }
            Err(source) => {
                tracing::warn!(key = %key, error = %source, "snapshot rejected, holding writes");
                self.shared.report(SyncError::InvalidSnapshot {
                    key: key.to_string(),
                    source,
                });
            }
        }

        if write {
            self.flush().await;
        }
    }

    /// Leave fallback mode if a live subscription is delivering again.
    fn reconnected(&mut self) -> bool {
        if !self.fallback {
            return false;
        }
        self.fallback = false;
        self.reconnect_at = None;
        self.backoff = self.config.reconnect_initial;
        tracing::info!(key = %self.shared.key, "reconnected to remote store");
        true
    }

    async fn enter_fallback(&mut self, reason: &ChannelError) {
        self.subscription = None;
        lock(&self.shared.state).mark_offline();

        if !self.fallback {
            self.fallback = true;
            tracing::warn!(key = %self.shared.key, error = %reason, "remote store unavailable, using local cache");
            self.restore_cache().await;
        }
        self.shared.loaded();
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.backoff;
        self.backoff = (self.backoff * 2).min(self.config.reconnect_max);
        self.reconnect_at = Some(Instant::now() + delay);

        tracing::debug!(
            key = %self.shared.key,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnect scheduled"
        );
    }

    async fn restore_cache(&mut self) {
        let key = self.shared.key.to_string();
        let entry = match self.cache.get(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(source) => {
                tracing::warn!(key = %key, error = %source, "cache read failed");
                self.shared.report(SyncError::Cache { key, source });
                return;
            }
        };

        let saved_at = entry.saved_at;
        let restored = {
            let mut state = lock(&self.shared.state);
            let restored = state.restore_from_cache(entry);
            if let Ok(true) = restored {
                self.shared.enqueue(state.value().clone(), Origin::Cache);
            }
            restored
        };
        match restored {
            Ok(true) => {
                tracing::info!(key = %key, saved_at, "restored local state from cache");
                self.shared.deliver();
            }
            Ok(false) => {
                tracing::debug!(key = %key, saved_at, "cache entry not newer than local state");
            }
            Err(source) => {
                tracing::warn!(key = %key, error = %source, "cache entry rejected");
                self.shared.report(SyncError::Cache {
                    key,
                    source: CacheError::Entry(source),
                });
            }
        }
    }

    async fn persist_cache(&mut self) {
        let now = self.shared.clock.now_ms();
        let entry = lock(&self.shared.state).cache_entry(now);
        let entry = match entry {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(error) => {
                tracing::error!(key = %self.shared.key, %error, "could not encode cache entry");
                return;
            }
        };

        let fingerprint = entry.fingerprint.clone();
        match self.cache.set(entry).await {
            Ok(()) => {
                tracing::debug!(key = %self.shared.key, fingerprint = %fingerprint.short(), "cached local state");
            }
            Err(source) => {
                tracing::warn!(key = %self.shared.key, error = %source, "cache write failed");
                self.shared.report(SyncError::Cache {
                    key: self.shared.key.to_string(),
                    source,
                });
            }
        }
    }

    /// True when local edits can only be kept in the cache: the store is
    /// unreachable, or its document is unreadable or not yet loaded.
    fn cache_only(&self) -> bool {
        let state = lock(&self.shared.state);
        let held = state.is_loading() || state.is_remote_unreadable();
        state.is_offline() || (held && state.pending().is_some())
    }

    /// Write now if a write is due, or cache while the store cannot take it.
    async fn flush(&mut self) {
        self.debounce_at = None;
        if self.writing {
            return;
        }

        if self.cache_only() {
            self.persist_cache().await;
            return;
        }

        let now = self.shared.clock.now_ms();
        let write = lock(&self.shared.state).begin_write(now);
        match write {
            Ok(Some(write)) => self.send_write(write),
            Ok(None) => {}
            Err(error) => {
                tracing::error!(key = %self.shared.key, %error, "could not encode local state");
            }
        }
    }

    fn send_write(&mut self, write: PendingWrite) {
        tracing::debug!(
            key = %self.shared.key,
            revision = %write.revision,
            fingerprint = %write.fingerprint.short(),
            attempt = write.attempts,
            "write issued"
        );

        self.writing = true;
        let channel = self.channel.clone();
        let done = self.done_tx.clone();
        let doc = Document::new(write.value, write.issued_at);
        tokio::spawn(async move {
            let result = channel.write(doc).await;
            let _ = done.send(result);
        });
    }

    async fn on_write_done(&mut self, result: WriteResult) {
        self.writing = false;

        let error = match result {
            Ok(()) => {
                let follow_up = lock(&self.shared.state).complete_write();
                match follow_up {
                    Ok(WriteFollowUp::WriteAgain) => {
                        tracing::debug!(key = %self.shared.key, "write acknowledged, local state moved on");
                        self.flush().await;
                    }
                    Ok(_) => tracing::debug!(key = %self.shared.key, "write acknowledged"),
                    Err(error) => tracing::error!(key = %self.shared.key, %error, "write bookkeeping out of step"),
                }
                return;
            }
            Err(error) => error,
        };

        let failure = if error.is_transient() {
            WriteFailure::Transient
        } else {
            WriteFailure::Permanent
        };
        let follow_up = lock(&self.shared.state).fail_write(failure);

        match follow_up {
            Ok(WriteFollowUp::Offline) => {
                self.enter_fallback(&error).await;
                self.persist_cache().await;
            }
            Ok(WriteFollowUp::Retry(write)) => {
                tracing::warn!(key = %self.shared.key, %error, "write refused, retrying once");
                self.send_write(write);
            }
            Ok(WriteFollowUp::GaveUp) => {
                tracing::error!(key = %self.shared.key, %error, "write dropped, keeping local state");
                self.shared.report(SyncError::PermanentWrite {
                    key: self.shared.key.to_string(),
                    source: error,
                });
            }
            Ok(WriteFollowUp::Idle | WriteFollowUp::WriteAgain) => {}
            Err(error) => tracing::error!(key = %self.shared.key, %error, "write bookkeeping out of step"),
        }
    }

    async fn shutdown(mut self) {
        self.subscription = None;
        self.debounce_at = None;
        self.reconnect_at = None;

        if self.cache_only() {
            self.persist_cache().await;
        } else {
            // Fire and forget: wait out the in-flight write, then send what is left.
            let shared = self.shared.clone();
            let channel = self.channel.clone();
            let mut done = self.done;
            let writing = self.writing;
            tokio::spawn(async move {
                if writing {
                    let result = done.recv().await;
                    let mut state = lock(&shared.state);
                    let settled = match result {
                        Some(Ok(())) => state.complete_write().is_ok(),
                        _ => false,
                    };
                    if !settled {
                        return;
                    }
                }

                let now = shared.clock.now_ms();
                let write = lock(&shared.state).begin_write(now);
                if let Ok(Some(write)) = write {
                    tracing::debug!(key = %shared.key, revision = %write.revision, "flushing on dispose");
                    let _ = channel.write(Document::new(write.value, write.issued_at)).await;
                }
            });
        }

        tracing::info!(key = %self.shared.key, "sync engine disposed");
    }
}
