//! In-process real-time document store.
//!
//! Tracks documents and live subscriptions per key and pushes every write
//! to every subscriber of that key, the writer included. Used by the demo
//! binary and the tests, with switches to simulate outages, rejected
//! subscriptions and writes, failed writes and write latency.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use tether_engine::Timestamp;

use crate::channel::{
    Document, DocumentKey, DocumentStore, EventSender, RemoteChannel, RemoteEvent, Subscription,
};
use crate::ChannelError;

/// A single live subscription.
#[derive(Debug)]
struct Subscriber {
    id: String,
    sender: EventSender,
}

#[derive(Debug)]
struct Inner {
    documents: DashMap<String, Document>,
    subscribers: DashMap<String, Vec<Subscriber>>,
    writes: DashMap<String, Vec<Document>>,
    denied: DashSet<String>,
    refused: DashSet<String>,
    failing: DashSet<String>,
    write_latency_ms: AtomicU64,
    online: AtomicBool,
}

/// Shared in-memory document store. Cloning shares the same documents.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty, online store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                documents: DashMap::new(),
                subscribers: DashMap::new(),
                writes: DashMap::new(),
                denied: DashSet::new(),
                refused: DashSet::new(),
                failing: DashSet::new(),
                write_latency_ms: AtomicU64::new(0),
                online: AtomicBool::new(true),
            }),
        }
    }

    /// Channel bound to `key`.
    pub fn channel(&self, key: DocumentKey) -> MemoryChannel {
        MemoryChannel {
            store: self.clone(),
            key,
        }
    }

    /// Current document under `key`.
    pub fn get(&self, key: &str) -> Option<Document> {
        self.inner.documents.get(key).map(|doc| doc.value().clone())
    }

    /// Register a subscriber and deliver the current document to it.
    ///
    /// Returns the subscription ID.
    pub fn subscribe(&self, key: &str, sender: EventSender) -> Result<String, ChannelError> {
        self.ensure_online()?;
        if self.inner.refused.contains(key) {
            return Err(ChannelError::PermissionDenied(format!(
                "reading '{key}' is not allowed"
            )));
        }

        let sub_id = uuid::Uuid::new_v4().to_string();

        // Holding the entry keeps writes from slipping between the initial
        // delivery and registration.
        let mut subs = self.inner.subscribers.entry(key.to_string()).or_default();
        let initial = match self.get(key) {
            Some(doc) => RemoteEvent::Snapshot(doc),
            None => RemoteEvent::Missing,
        };
        let _ = sender.send(initial);
        subs.push(Subscriber {
            id: sub_id.clone(),
            sender,
        });

        tracing::debug!(key = %key, sub_id = %sub_id, "subscriber registered");

        Ok(sub_id)
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, key: &str, sub_id: &str) {
        if let Some(mut subs) = self.inner.subscribers.get_mut(key) {
            subs.retain(|s| s.id != sub_id);
            if subs.is_empty() {
                drop(subs);
                self.inner.subscribers.remove_if(key, |_, subs| subs.is_empty());
            }
            tracing::debug!(key = %key, sub_id = %sub_id, "subscriber removed");
        }
    }

    /// Store a document written through a channel and push it to subscribers.
    pub fn write(&self, key: &str, doc: Document) -> Result<(), ChannelError> {
        self.ensure_online()?;
        if self.inner.failing.remove(key).is_some() {
            tracing::debug!(key = %key, "write dropped by the network");
            return Err(ChannelError::Unavailable(format!("write to '{key}' timed out")));
        }
        if self.inner.denied.contains(key) {
            return Err(ChannelError::PermissionDenied(format!(
                "writes to '{key}' are not allowed"
            )));
        }

        self.inner
            .writes
            .entry(key.to_string())
            .or_default()
            .push(doc.clone());
        self.store(key, doc);
        Ok(())
    }

    /// Simulate a write by another client. Bypasses the write log and the
    /// online switch.
    pub fn put_external(&self, key: &str, value: Value, updated_at: Timestamp) {
        self.store(key, Document::new(value, updated_at));
    }

    fn store(&self, key: &str, doc: Document) {
        self.inner.documents.insert(key.to_string(), doc.clone());
        let recipients = self.broadcast(key, RemoteEvent::Snapshot(doc));

        tracing::debug!(key = %key, recipients, "document stored");
    }

    /// Send an event to every subscriber of `key`.
    ///
    /// Returns the number of subscribers that received it.
    fn broadcast(&self, key: &str, event: RemoteEvent) -> usize {
        let Some(subs) = self.inner.subscribers.get(key) else {
            return 0;
        };

        subs.iter()
            .filter(|s| s.sender.send(event.clone()).is_ok())
            .count()
    }

    /// Take the store on- or offline.
    ///
    /// Going offline breaks every live subscription with an `Unavailable`
    /// error; while offline, writes and new subscriptions fail.
    pub fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if was_online && !online {
            let error = RemoteEvent::Error(ChannelError::Unavailable("store offline".into()));
            let keys: Vec<String> = self
                .inner
                .subscribers
                .iter()
                .map(|entry| entry.key().clone())
                .collect();
            for key in keys {
                if let Some((_, subs)) = self.inner.subscribers.remove(&key) {
                    for sub in subs {
                        let _ = sub.sender.send(error.clone());
                    }
                }
            }
            tracing::info!("memory store offline");
        } else if !was_online && online {
            tracing::info!("memory store online");
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Refuse writes to `key` with a permission error.
    pub fn deny_writes(&self, key: &str) {
        self.inner.denied.insert(key.to_string());
    }

    pub fn allow_writes(&self, key: &str) {
        self.inner.denied.remove(key);
    }

    /// Refuse subscriptions to `key` with a permission error.
    pub fn refuse_subscriptions(&self, key: &str) {
        self.inner.refused.insert(key.to_string());
    }

    /// Fail the next write to `key` with an `Unavailable` error while
    /// subscriptions stay up.
    pub fn fail_next_write(&self, key: &str) {
        self.inner.failing.insert(key.to_string());
    }

    /// Delay every channel write by `latency` before it reaches the store.
    pub fn set_write_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.inner.write_latency_ms.store(ms, Ordering::SeqCst);
    }

    fn write_latency(&self) -> Duration {
        Duration::from_millis(self.inner.write_latency_ms.load(Ordering::SeqCst))
    }

    /// Every document successfully written to `key` through a channel.
    pub fn write_log(&self, key: &str) -> Vec<Document> {
        self.inner
            .writes
            .get(key)
            .map(|log| log.value().clone())
            .unwrap_or_default()
    }

    /// Number of live subscriptions on `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner.subscribers.get(key).map_or(0, |subs| subs.len())
    }

    fn ensure_online(&self) -> Result<(), ChannelError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(ChannelError::Unavailable("store offline".into()))
        }
    }
}

impl DocumentStore for MemoryStore {
    fn channel(&self, key: DocumentKey) -> Arc<dyn RemoteChannel> {
        Arc::new(MemoryStore::channel(self, key))
    }
}

/// [`RemoteChannel`] over a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    store: MemoryStore,
    key: DocumentKey,
}

#[async_trait]
impl RemoteChannel for MemoryChannel {
    fn key(&self) -> &DocumentKey {
        &self.key
    }

    async fn read(&self) -> Result<Option<Document>, ChannelError> {
        self.store.ensure_online()?;
        Ok(self.store.get(&self.key.to_string()))
    }

    async fn subscribe(&self, events: EventSender) -> Result<Subscription, ChannelError> {
        let key = self.key.to_string();
        let sub_id = self.store.subscribe(&key, events)?;

        let store = self.store.clone();
        Ok(Subscription::new(move || store.unsubscribe(&key, &sub_id)))
    }

    async fn write(&self, document: Document) -> Result<(), ChannelError> {
        let latency = self.store.write_latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.store.write(&self.key.to_string(), document)
    }
}
