//! Redis hub for multi-node deployments.
//!
//! Shared topics (every route except `s.<id>`) are Redis streams read through
//! a consumer group, so each message is handled by exactly one gateway
//! instance. Per-session topics are owned by the single instance holding the
//! connection and use plain pub/sub.
//!
//! Publishing goes through one multiplexed connection. Every subscription
//! owns a dedicated connection, because stream reads block, and a dispatcher
//! task that feeds the router one message at a time.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::application::Router;
use crate::domain::foundation::{Envelope, SESSION_TOPIC_PREFIX};
use crate::ports::{decode_envelope, encode_envelope, Hub, HubError};

/// Stream entry field holding the encoded envelope.
pub const PAYLOAD_FIELD: &str = "payload";

const READ_BLOCK_MS: usize = 1_000;
const READ_BATCH: usize = 32;
const RETRY_DELAY: Duration = Duration::from_secs(1);

impl From<redis::RedisError> for HubError {
    fn from(err: redis::RedisError) -> Self {
        HubError::Unavailable(err.to_string())
    }
}

/// Settings for [`RedisHub`].
#[derive(Debug, Clone)]
pub struct RedisHubConfig {
    /// Bound on connecting and on every publish.
    pub timeout: Duration,
    /// Consumer group shared by all gateway instances.
    pub consumer_group: String,
    /// Name of this instance inside the group.
    pub consumer_name: String,
    /// Approximate number of entries kept per stream.
    pub stream_max_len: usize,
}

impl Default for RedisHubConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            consumer_group: "prelude-gateway".to_string(),
            consumer_name: default_consumer_name(),
            stream_max_len: 10_000,
        }
    }
}

/// Hostname plus a random suffix, so two instances on one host never share a name.
pub fn default_consumer_name() -> String {
    let host = hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "gateway".to_string());
    format!("{}-{}", host, &Uuid::new_v4().simple().to_string()[..8])
}

/// True for topics delivered to one consumer of the group.
pub fn is_shared_topic(topic: &str) -> bool {
    !topic.starts_with(SESSION_TOPIC_PREFIX)
}

/// Encoded envelope carried by a stream entry.
pub fn entry_payload(entry: &StreamId) -> Option<Vec<u8>> {
    entry.get(PAYLOAD_FIELD)
}

/// Redis-backed hub.
pub struct RedisHub {
    client: redis::Client,
    conn: MultiplexedConnection,
    router: RwLock<Option<Weak<Router>>>,
    subscriptions: DashMap<String, JoinHandle<()>>,
    config: RedisHubConfig,
}

impl RedisHub {
    /// Connects to Redis at `url`.
    pub async fn connect(url: &str, config: RedisHubConfig) -> Result<Self, HubError> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(config.timeout, client.get_multiplexed_tokio_connection())
            .await
            .map_err(|_| HubError::Unavailable("timed out connecting to redis".to_string()))??;

        tracing::info!(
            consumer_group = %config.consumer_group,
            consumer_name = %config.consumer_name,
            "Connected to redis"
        );
        Ok(Self {
            client,
            conn,
            router: RwLock::new(None),
            subscriptions: DashMap::new(),
            config,
        })
    }

    async fn open_connection(&self) -> Result<redis::aio::Connection, HubError> {
        tokio::time::timeout(self.config.timeout, self.client.get_async_connection())
            .await
            .map_err(|_| HubError::Unavailable("timed out opening redis connection".to_string()))?
            .map_err(HubError::from)
    }

    async fn subscribe_stream(
        &self,
        topic: &str,
        router: Weak<Router>,
    ) -> Result<JoinHandle<()>, HubError> {
        let mut conn = self.open_connection().await?;
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(topic, &self.config.consumer_group, "$")
            .await;
        match created {
            Ok(()) => {}
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(e.into()),
        }

        let reader = StreamReader {
            topic: topic.to_string(),
            client: self.client.clone(),
            group: self.config.consumer_group.clone(),
            consumer: self.config.consumer_name.clone(),
            router,
        };
        Ok(tokio::spawn(reader.run(conn)))
    }

    async fn subscribe_channel(
        &self,
        topic: &str,
        router: Weak<Router>,
    ) -> Result<JoinHandle<()>, HubError> {
        let mut pubsub = self.open_connection().await?.into_pubsub();
        pubsub.subscribe(topic).await?;
        Ok(tokio::spawn(run_channel_dispatcher(topic.to_string(), router, pubsub)))
    }
}

impl Drop for RedisHub {
    fn drop(&mut self) {
        for entry in self.subscriptions.iter() {
            entry.value().abort();
        }
    }
}

/// Decodes and routes one delivery. Returns false once the router is gone.
async fn dispatch_payload(topic: &str, router: &Weak<Router>, payload: &[u8]) -> bool {
    let envelope = match decode_envelope(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(topic = %topic, error = %e, "Dropping undecodable delivery");
            return true;
        }
    };

    let Some(router) = router.upgrade() else {
        return false;
    };
    router.dispatch(topic, envelope).await;
    true
}

async fn run_channel_dispatcher(topic: String, router: Weak<Router>, pubsub: redis::aio::PubSub) {
    let mut messages = pubsub.into_on_message();
    while let Some(msg) = messages.next().await {
        if !dispatch_payload(&topic, &router, msg.get_payload_bytes()).await {
            break;
        }
    }
    tracing::debug!(topic = %topic, "Redis channel subscription ended");
}

/// Group consumer of one stream.
struct StreamReader {
    topic: String,
    client: redis::Client,
    group: String,
    consumer: String,
    router: Weak<Router>,
}

impl StreamReader {
    async fn run(self, mut conn: redis::aio::Connection) {
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .block(READ_BLOCK_MS)
            .count(READ_BATCH);

        loop {
            let read: redis::RedisResult<Option<StreamReadReply>> = conn
                .xread_options(&[&self.topic], &[">"], &options)
                .await;

            let reply = match read {
                Ok(Some(reply)) => reply,
                Ok(None) => {
                    if self.router.strong_count() == 0 {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    tracing::warn!(topic = %self.topic, error = %e, "Stream read failed, reconnecting");
                    tokio::time::sleep(RETRY_DELAY).await;
                    match self.client.get_async_connection().await {
                        Ok(fresh) => conn = fresh,
                        Err(e) => {
                            tracing::warn!(topic = %self.topic, error = %e, "Redis reconnect failed");
                        }
                    }
                    continue;
                }
            };

            for entry in reply.keys.into_iter().flat_map(|key| key.ids) {
                let routed = match entry_payload(&entry) {
                    Some(payload) => dispatch_payload(&self.topic, &self.router, &payload).await,
                    None => {
                        tracing::warn!(topic = %self.topic, entry_id = %entry.id, "Stream entry has no payload");
                        true
                    }
                };

                let acked: redis::RedisResult<i64> =
                    conn.xack(&self.topic, &self.group, &[&entry.id]).await;
                if let Err(e) = acked {
                    tracing::warn!(topic = %self.topic, entry_id = %entry.id, error = %e, "Stream ack failed");
                }

                if !routed {
                    tracing::debug!(topic = %self.topic, "Redis stream consumer ended");
                    return;
                }
            }
        }
        tracing::debug!(topic = %self.topic, "Redis stream consumer ended");
    }
}

#[async_trait]
impl Hub for RedisHub {
    fn router(&self) -> Option<Arc<Router>> {
        self.router.read().as_ref().and_then(Weak::upgrade)
    }

    fn set_router(&self, router: Weak<Router>) {
        *self.router.write() = Some(router);
    }

    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), HubError> {
        let payload = encode_envelope(envelope)?;
        let mut conn = self.conn.clone();
        let timed_out = || HubError::Unavailable(format!("publish to {} timed out", topic));

        if is_shared_topic(topic) {
            let maxlen = StreamMaxlen::Approx(self.config.stream_max_len);
            let _entry_id: String = tokio::time::timeout(
                self.config.timeout,
                conn.xadd_maxlen(topic, maxlen, "*", &[(PAYLOAD_FIELD, payload)]),
            )
            .await
            .map_err(|_| timed_out())??;
        } else {
            let _receivers: i64 = tokio::time::timeout(self.config.timeout, conn.publish(topic, payload))
                .await
                .map_err(|_| timed_out())??;
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

        let task = if is_shared_topic(topic) {
            self.subscribe_stream(topic, router).await?
        } else {
            self.subscribe_channel(topic, router).await?
        };
        if let Some(previous) = self.subscriptions.insert(topic.to_string(), task) {
            previous.abort();
        }

        tracing::debug!(topic = %topic, shared = is_shared_topic(topic), "Subscribed on redis");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), HubError> {
        if let Some((_, task)) = self.subscriptions.remove(topic) {
            task.abort();
            tracing::debug!(topic = %topic, "Unsubscribed on redis");
        }
        Ok(())
    }
}
