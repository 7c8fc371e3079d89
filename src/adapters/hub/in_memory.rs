//! In-process hub for tests and single-node deployments.
//!
//! Each subscribed topic gets one bounded delivery queue drained by one
//! dispatcher task, so deliveries on a topic reach the router in publish
//! order while different topics run concurrently. A full queue drops the
//! delivery with a warning.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::application::Router;
use crate::domain::foundation::Envelope;
use crate::ports::{decode_envelope, encode_envelope, Hub, HubError};

/// Default delivery queue depth per topic.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 1024;

struct Subscription {
    sender: mpsc::Sender<Vec<u8>>,
    task: JoinHandle<()>,
}

/// In-memory hub.
///
/// Every published envelope is also recorded for assertions:
///
/// ```ignore
/// let hub = Arc::new(InMemoryHub::new());
/// let router = Router::new("prelude", hub.clone());
///
/// hub.publish("s.S1", &envelope).await?;
/// assert_eq!(hub.published_to("s.S1").len(), 1);
/// ```
pub struct InMemoryHub {
    router: RwLock<Option<Weak<Router>>>,
    subscriptions: DashMap<String, Subscription>,
    published: RwLock<Vec<(String, Envelope)>>,
    capacity: usize,
}

impl InMemoryHub {
    /// Creates a hub with the default per-topic queue depth.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIPTION_CAPACITY)
    }

    /// Creates a hub with the given per-topic queue depth.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            router: RwLock::new(None),
            subscriptions: DashMap::new(),
            published: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    // === Test Helpers ===

    /// Returns every `(topic, envelope)` published so far.
    pub fn published(&self) -> Vec<(String, Envelope)> {
        self.published.read().clone()
    }

    /// Returns envelopes published on `topic`.
    pub fn published_to(&self, topic: &str) -> Vec<Envelope> {
        self.published
            .read()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Returns envelopes of a specific type, regardless of topic.
    pub fn published_of_type(&self, event_type: &str) -> Vec<Envelope> {
        self.published
            .read()
            .iter()
            .filter(|(_, e)| e.event_type == event_type)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Returns count of published envelopes.
    pub fn published_count(&self) -> usize {
        self.published.read().len()
    }

    /// Clears recorded envelopes (for test isolation).
    pub fn clear(&self) {
        self.published.write().clear();
    }

    /// Checks if this hub currently delivers `topic`.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.contains_key(topic)
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Default for InMemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InMemoryHub {
    fn drop(&mut self) {
        for entry in self.subscriptions.iter() {
            entry.value().task.abort();
        }
    }
}

async fn run_dispatcher(topic: String, router: Weak<Router>, mut rx: mpsc::Receiver<Vec<u8>>) {
    while let Some(payload) = rx.recv().await {
        let envelope = match decode_envelope(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "Dropping undecodable delivery");
                continue;
            }
        };

        let Some(router) = router.upgrade() else {
            tracing::debug!(topic = %topic, "Router dropped, stopping dispatcher");
            break;
        };
        router.dispatch(&topic, envelope).await;
    }
}

#[async_trait]
impl Hub for InMemoryHub {
    fn router(&self) -> Option<Arc<Router>> {
        self.router.read().as_ref().and_then(Weak::upgrade)
    }

    fn set_router(&self, router: Weak<Router>) {
        *self.router.write() = Some(router);
    }

    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), HubError> {
        let payload = encode_envelope(envelope)?;

        self.published
            .write()
            .push((topic.to_string(), envelope.clone()));

        let sender = match self.subscriptions.get(topic) {
            Some(subscription) => subscription.sender.clone(),
            None => return Ok(()),
        };

        match sender.try_send(payload) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(topic = %topic, "Subscription queue full, dropping delivery");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(topic = %topic, "Subscription closed, dropping delivery");
                self.subscriptions.remove(topic);
            }
        }
        Ok(())
    }

    async fn queue_subscribe(&self, topic: &str) -> Result<(), HubError> {
        if self.subscriptions.contains_key(topic) {
            return Ok(());
        }

        let router = self
            .router
            .read()
            .clone()
            .ok_or_else(|| HubError::Unavailable("hub has no router bound".to_string()))?;

        let (sender, rx) = mpsc::channel(self.capacity);
        let task = tokio::spawn(run_dispatcher(topic.to_string(), router, rx));

        if let Some(previous) = self
            .subscriptions
            .insert(topic.to_string(), Subscription { sender, task })
        {
            previous.task.abort();
        }

        tracing::debug!(topic = %topic, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), HubError> {
        if let Some((_, subscription)) = self.subscriptions.remove(topic) {
            subscription.task.abort();
            tracing::debug!(topic = %topic, "Unsubscribed");
        }
        Ok(())
    }
}
