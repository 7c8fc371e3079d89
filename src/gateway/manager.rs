//! Manager - facade over the session registry and the broker mailbox.
//!
//! ## Responsibilities
//!
//! - Shards sessions over a fixed set of buckets by FNV-1a hash of their id
//! - Keeps the online counter in step with registrations
//! - Forwards client envelopes to the hub through one bounded mailbox
//! - Delivers broker envelopes to local sessions (`push`, `push_all`)
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `bucket_count` | 128 | Number of registry shards |
//! | `bucket_worker_count` | 32 | Workers per shard |
//! | `bucket_job_capacity` | 1000 | Job queue depth per shard |
//! | `mailbox_capacity` | 128 | Envelopes waiting for the hub |
//!
//! ## Graceful Shutdown
//!
//! `shutdown` stops intake, lets the forwarding loop publish what is already
//! queued and waits for it up to a deadline. Live sessions are left alone.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::Router;
use crate::domain::foundation::{DomainError, Envelope, ErrorCode, RouteInfo, SessionClosed};
use crate::ports::Hub;

use super::bucket::{Bucket, Job};
use super::{Session, Status};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash.
pub fn fnv32a(input: &str) -> u32 {
    input.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Configuration for the Manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub bucket_count: usize,
    pub bucket_worker_count: usize,
    pub bucket_job_capacity: usize,
    pub mailbox_capacity: usize,
    /// Address announced in route info; defaults to the machine hostname.
    pub gateway_addr: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            bucket_count: 128,
            bucket_worker_count: 32,
            bucket_job_capacity: 1000,
            mailbox_capacity: 128,
            gateway_addr: None,
        }
    }
}

impl ManagerConfig {
    pub fn with_bucket_count(mut self, count: usize) -> Self {
        self.bucket_count = count;
        self
    }

    pub fn with_bucket_worker_count(mut self, count: usize) -> Self {
        self.bucket_worker_count = count;
        self
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn with_gateway_addr(mut self, addr: impl Into<String>) -> Self {
        self.gateway_addr = Some(addr.into());
        self
    }
}

fn local_hostname() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Session registry and broker mailbox for one gateway process.
pub struct Manager {
    hub: Arc<dyn Hub>,
    hostname: String,
    buckets: Vec<Arc<Bucket>>,
    status: Status,
    active: AtomicBool,
    mailbox: RwLock<Option<mpsc::Sender<Envelope>>>,
    mailbox_rx: Mutex<Option<mpsc::Receiver<Envelope>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    workers: CancellationToken,
    config: ManagerConfig,
}

impl Manager {
    /// Creates an inactive manager. Call [`Manager::start`] before use.
    pub fn new(hub: Arc<dyn Hub>, config: ManagerConfig) -> Arc<Self> {
        let bucket_count = config.bucket_count.max(1);
        let buckets = (0..bucket_count)
            .map(|id| Arc::new(Bucket::new(id, config.bucket_job_capacity)))
            .collect();
        let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let hostname = config.gateway_addr.clone().unwrap_or_else(local_hostname);

        Arc::new(Self {
            hub,
            hostname,
            buckets,
            status: Status::new(),
            active: AtomicBool::new(false),
            mailbox: RwLock::new(Some(tx)),
            mailbox_rx: Mutex::new(Some(rx)),
            forwarder: Mutex::new(None),
            workers: CancellationToken::new(),
            config,
        })
    }

    pub fn hub(&self) -> &Arc<dyn Hub> {
        &self.hub
    }

    /// Router bound to the hub, if any.
    pub fn router(&self) -> Option<Arc<Router>> {
        self.hub.router()
    }

    /// Address this gateway announces in route info.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Bucket owning `session_id`.
    pub fn bucket_by_session_id(&self, session_id: &str) -> &Arc<Bucket> {
        let index = fnv32a(session_id) as usize % self.buckets.len();
        &self.buckets[index]
    }

    /// Starts the forwarding loop and bucket workers. Later calls are no-ops.
    pub fn start(&self) {
        let Some(rx) = self.mailbox_rx.lock().take() else {
            return;
        };

        self.active.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(forward_to_hub(self.hub.clone(), rx));
        *self.forwarder.lock() = Some(handle);

        for bucket in &self.buckets {
            bucket.start_workers(self.config.bucket_worker_count, self.workers.clone());
        }

        tracing::info!(
            buckets = self.buckets.len(),
            workers_per_bucket = self.config.bucket_worker_count,
            hostname = %self.hostname,
            "Gateway manager started"
        );
    }

    /// Stops intake and waits up to `timeout` for queued envelopes to reach the hub.
    ///
    /// On timeout the forwarding loop keeps running in the background and
    /// `DeadlineExceeded` is returned.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), DomainError> {
        self.active.store(false, Ordering::SeqCst);
        self.mailbox.write().take();

        let handle = self.forwarder.lock().take();
        let Some(handle) = handle else {
            self.workers.cancel();
            return Ok(());
        };

        let result = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => {
                tracing::info!("Gateway manager shut down gracefully");
                Ok(())
            }
            Ok(Err(e)) => Err(DomainError::new(
                ErrorCode::InternalError,
                format!("forwarding loop failed: {}", e),
            )),
            Err(_) => {
                tracing::error!(timeout_ms = timeout.as_millis() as u64, "Gateway manager shutdown timed out");
                Err(DomainError::new(
                    ErrorCode::DeadlineExceeded,
                    "manager mailbox was not drained before the deadline",
                ))
            }
        };

        self.workers.cancel();
        result
    }

    /// Registers a session and counts it online.
    pub fn add_session(&self, session: Arc<Session>) {
        let bucket = self.bucket_by_session_id(session.id());
        if bucket.add_session(session) {
            self.status.increase_online_people();
        }
    }

    /// Deregisters a session and announces its departure.
    ///
    /// Returns false when `session` is not the registered entry for its id,
    /// either because it already left or because a newer session took over.
    pub fn delete_session(&self, session: &Session) -> bool {
        let bucket = self.bucket_by_session_id(session.id());
        if bucket.delete_session(session).is_none() {
            return false;
        }
        self.status.decrease_online_people();

        let closed = SessionClosed {
            session_id: session.id().to_string(),
            gateway_addr: self.hostname.clone(),
        };
        match closed.to_envelope(&self.hostname) {
            Ok(envelope) => {
                self.add_envelope_to_hub(envelope);
            }
            Err(e) => tracing::warn!(session_id = %session.id(), error = %e, "Failed to build session closed event"),
        }
        true
    }

    /// Announces which gateway owns `session` and when it was last seen.
    pub fn update_route_info(&self, session: &Session) -> Result<(), DomainError> {
        let info = RouteInfo {
            session_id: session.id().to_string(),
            gateway_addr: self.hostname.clone(),
            last_seen_at: session.last_seen_at(),
        };
        let envelope = info.to_envelope(&self.hostname)?;
        self.add_envelope_to_hub(envelope);
        Ok(())
    }

    /// Delivers to a local session. Unknown sessions and an inactive manager are no-ops.
    pub fn push(&self, session_id: &str, envelope: Envelope) -> Result<(), DomainError> {
        if !self.is_active() {
            tracing::debug!(session_id = %session_id, "Manager inactive, push ignored");
            return Ok(());
        }
        self.bucket_by_session_id(session_id).push(session_id, envelope)
    }

    /// Broadcasts to every local session through the bucket workers.
    pub fn push_all(&self, envelope: Envelope) {
        if !self.is_active() {
            tracing::debug!("Manager inactive, broadcast ignored");
            return;
        }
        for bucket in &self.buckets {
            bucket.enqueue(Job::PushAll(envelope.clone()));
        }
    }

    /// Queues an envelope for publication under its type.
    ///
    /// Never blocks. Returns false when the envelope was dropped because the
    /// manager is inactive or the mailbox is full.
    pub fn add_envelope_to_hub(&self, envelope: Envelope) -> bool {
        if !self.is_active() {
            tracing::debug!(topic = %envelope.event_type, "Manager inactive, envelope dropped");
            return false;
        }

        let mailbox = self.mailbox.read();
        let Some(tx) = mailbox.as_ref() else {
            return false;
        };

        match tx.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                tracing::warn!(topic = %envelope.event_type, "Manager mailbox full, envelope dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Total sessions over all buckets.
    pub fn session_count(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.count()).sum()
    }

    /// Looks up a local session.
    pub fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.bucket_by_session_id(session_id).session(session_id)
    }
}

async fn forward_to_hub(hub: Arc<dyn Hub>, mut rx: mpsc::Receiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        if let Err(e) = hub.publish(&envelope.event_type, &envelope).await {
            tracing::error!(topic = %envelope.event_type, error = %e, "Failed to publish envelope to hub");
        }
    }
    tracing::debug!("Manager mailbox drained");
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("hostname", &self.hostname)
            .field("buckets", &self.buckets.len())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::hub::InMemoryHub;
    use crate::ports::HubError;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::Weak;

    fn manager_with_hub(config: ManagerConfig) -> (Arc<Manager>, Arc<InMemoryHub>) {
        let hub = Arc::new(InMemoryHub::new());
        let manager = Manager::new(hub.clone(), config.with_gateway_addr("gw-test"));
        (manager, hub)
    }

    /// Hub whose publish takes a fixed time.
    struct SlowHub {
        delay: Duration,
    }

    #[async_trait]
    impl Hub for SlowHub {
        fn router(&self) -> Option<Arc<Router>> {
            None
        }

        fn set_router(&self, _router: Weak<Router>) {}

        async fn publish(&self, _topic: &str, _envelope: &Envelope) -> Result<(), HubError> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }

        async fn queue_subscribe(&self, _topic: &str) -> Result<(), HubError> {
            Ok(())
        }
    }

    #[test]
    fn fnv32a_matches_reference_vectors() {
        assert_eq!(fnv32a(""), 0x811c_9dc5);
        assert_eq!(fnv32a("a"), 0xe40c_292c);
        assert_eq!(fnv32a("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn bucket_lookup_uses_hash_modulo_count() {
        let (manager, _) = manager_with_hub(ManagerConfig::default().with_bucket_count(7));
        let bucket = manager.bucket_by_session_id("foobar");
        assert_eq!(bucket.id(), (0xbf9c_f968u32 % 7) as usize);
    }

    #[test]
    fn zero_bucket_count_is_clamped() {
        let (manager, _) = manager_with_hub(ManagerConfig::default().with_bucket_count(0));
        assert_eq!(manager.bucket_count(), 1);
        assert_eq!(manager.bucket_by_session_id("x").id(), 0);
    }

    #[tokio::test]
    async fn push_to_unknown_session_is_ok() {
        let (manager, hub) = manager_with_hub(ManagerConfig::default());
        manager.start();

        let result = manager.push("unknown-session", Envelope::new("notice"));

        assert!(result.is_ok());
        assert_eq!(hub.published_count(), 0);
    }

    #[tokio::test]
    async fn envelopes_are_forwarded_under_their_type() {
        let (manager, hub) = manager_with_hub(ManagerConfig::default());
        manager.start();

        assert!(manager.add_envelope_to_hub(Envelope::new("chat.send")));
        manager.shutdown(Duration::from_secs(1)).await.unwrap();

        assert_eq!(hub.published_to("chat.send").len(), 1);
    }

    #[tokio::test]
    async fn inactive_manager_drops_envelopes() {
        let (manager, hub) = manager_with_hub(ManagerConfig::default());

        assert!(!manager.add_envelope_to_hub(Envelope::new("chat.send")));
        manager.start();
        manager.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(!manager.add_envelope_to_hub(Envelope::new("chat.send")));

        assert_eq!(hub.published_count(), 0);
    }

    #[tokio::test]
    async fn full_mailbox_drops_without_blocking() {
        let hub: Arc<dyn Hub> = Arc::new(SlowHub {
            delay: Duration::from_secs(3600),
        });
        let manager = Manager::new(hub, ManagerConfig::default().with_mailbox_capacity(2));
        manager.start();

        let accepted = (0..10)
            .filter(|_| manager.add_envelope_to_hub(Envelope::new("x")))
            .count();
        assert!(accepted <= 3);
    }

    #[tokio::test]
    async fn publish_failures_do_not_stop_forwarding() {
        let (manager, hub) = manager_with_hub(ManagerConfig::default());
        manager.start();

        // Invalid envelope: rejected by the hub, then the loop carries on.
        manager.add_envelope_to_hub(Envelope::new("ok").with_source("a"));
        let mut bad = Envelope::new("bad");
        bad.id.clear();
        manager.add_envelope_to_hub(bad);
        manager.add_envelope_to_hub(Envelope::new("ok").with_source("b"));

        manager.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(hub.published_to("ok").len(), 2);
    }

    #[tokio::test]
    async fn shutdown_before_start_is_ok() {
        let (manager, _) = manager_with_hub(ManagerConfig::default());
        assert!(manager.shutdown(Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_within_deadline_succeeds() {
        let hub: Arc<dyn Hub> = Arc::new(SlowHub {
            delay: Duration::from_millis(100),
        });
        let manager = Manager::new(hub, ManagerConfig::default());
        manager.start();
        manager.add_envelope_to_hub(Envelope::new("a"));
        manager.add_envelope_to_hub(Envelope::new("b"));

        assert!(manager.shutdown(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_past_deadline_reports_deadline_exceeded() {
        let hub: Arc<dyn Hub> = Arc::new(SlowHub {
            delay: Duration::from_secs(5),
        });
        let manager = Manager::new(hub, ManagerConfig::default());
        manager.start();
        manager.add_envelope_to_hub(Envelope::new("a"));

        let started = tokio::time::Instant::now();
        let err = manager.shutdown(Duration::from_secs(1)).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::DeadlineExceeded);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    proptest! {
        #[test]
        fn bucket_choice_is_deterministic(id in "\\PC{0,40}", count in 1usize..512) {
            let hub: Arc<dyn Hub> = Arc::new(InMemoryHub::new());
            let a = Manager::new(hub.clone(), ManagerConfig::default().with_bucket_count(count));
            let b = Manager::new(hub, ManagerConfig::default().with_bucket_count(count));

            let first = a.bucket_by_session_id(&id).id();
            prop_assert_eq!(first, a.bucket_by_session_id(&id).id());
            prop_assert_eq!(first, b.bucket_by_session_id(&id).id());
            prop_assert!(first < count);
        }
    }
}
