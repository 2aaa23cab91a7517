//! The remote store capability consumed by sync engines.
//!
//! A [`RemoteChannel`] is bound to a single document. It pushes
//! [`RemoteEvent`]s into an mpsc sender handed to [`RemoteChannel::subscribe`]
//! and accepts whole-document writes. A write completing says nothing about
//! when, or whether, the matching snapshot is delivered.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_engine::{RemoteSnapshot, Timestamp};
use tokio::sync::mpsc;

use crate::ChannelError;

/// Sender for events from a subscription.
pub type EventSender = mpsc::UnboundedSender<RemoteEvent>;

/// Identifies one synced document.
///
/// Renders as `<namespace>/<userId>_<entityId>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    namespace: String,
    id: String,
}

impl DocumentKey {
    /// Key for the document owned by `entity_id` of `user_id`.
    pub fn new(
        namespace: impl Into<String>,
        user_id: impl AsRef<str>,
        entity_id: impl AsRef<str>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            id: format!("{}_{}", user_id.as_ref(), entity_id.as_ref()),
        }
    }

    /// Feature namespace, e.g. `dashboard`.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Document id within the namespace: `<userId>_<entityId>`.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.id)
    }
}

/// A document as stored remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Document body
    pub value: Value,
    /// Authoring time set by the writer (milliseconds since epoch)
    pub updated_at: Timestamp,
}

impl Document {
    pub fn new(value: Value, updated_at: Timestamp) -> Self {
        Self { value, updated_at }
    }
}

impl From<Document> for RemoteSnapshot {
    fn from(doc: Document) -> Self {
        RemoteSnapshot::new(doc.value, doc.updated_at)
    }
}

/// Events delivered by a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// The current document, delivered on subscribe and after every write
    /// by anyone, including the subscriber itself.
    Snapshot(Document),
    /// The document does not exist.
    Missing,
    /// The subscription broke.
    Error(ChannelError),
}

/// Live subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Subscription that runs `cancel` when dropped.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Subscription with nothing to release.
    pub fn detached() -> Self {
        Self { cancel: None }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Capability for one remote document.
#[async_trait]
pub trait RemoteChannel: Send + Sync + 'static {
    /// The document this channel is bound to.
    fn key(&self) -> &DocumentKey;

    /// Fetch the document once. `None` if it does not exist.
    async fn read(&self) -> Result<Option<Document>, ChannelError>;

    /// Start delivering events to `events`. The current document (or
    /// [`RemoteEvent::Missing`]) is delivered first.
    async fn subscribe(&self, events: EventSender) -> Result<Subscription, ChannelError>;

    /// Replace the document.
    async fn write(&self, document: Document) -> Result<(), ChannelError>;
}

/// A store that hands out channels by key.
pub trait DocumentStore: Send + Sync {
    fn channel(&self, key: DocumentKey) -> Arc<dyn RemoteChannel>;
}
