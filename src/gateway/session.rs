//! Session - one client connection and the loops that serve it.
//!
//! ```text
//!  socket ──► inbound loop ──► [inbound mailbox] ──► processing loop ──► Manager mailbox ──► hub
//!
//!  hub ──► route "s.<id>" ──► [event mailbox] ──► event loop ──► [outbound mailbox] ──► write loop ──► socket
//!                                                   │
//!                                                   └─ metadata.add updates session metadata
//! ```
//!
//! The inbound mailbox applies backpressure to the socket; the event and
//! outbound mailboxes drop on overflow. Any loop that hits a transport error
//! closes the session, and `close` tears everything down exactly once.

use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::Context;
use crate::domain::foundation::{
    DomainError, Envelope, ErrorCode, MetadataItem, SessionId, SessionState,
    Timestamp, METADATA_ADD,
};
use crate::ports::{Frame, FrameReader, FrameWriter, TransportError};

use super::Manager;

/// Tuning knobs for a session. Zero durations disable the matching check.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
    pub event_capacity: usize,
    pub idle_read_timeout: Duration,
    pub max_frame_size: usize,
    pub ping_period: Duration,
    pub write_timeout: Duration,
    pub enable_route_heartbeat: bool,
    pub route_heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 128,
            outbound_capacity: 128,
            event_capacity: 128,
            idle_read_timeout: Duration::from_secs(60),
            max_frame_size: 2048,
            ping_period: Duration::from_secs(20),
            write_timeout: Duration::from_secs(10),
            enable_route_heartbeat: true,
            route_heartbeat_interval: Duration::from_secs(60),
        }
    }
}

/// Receivers handed to the loops at start.
struct Mailboxes {
    reader: Box<dyn FrameReader>,
    inbound_rx: mpsc::Receiver<Frame>,
    events_rx: mpsc::Receiver<Envelope>,
    outbound_rx: mpsc::Receiver<Frame>,
}

/// A client connection.
pub struct Session {
    id: SessionId,
    client_ip: String,
    last_seen_at: Mutex<Timestamp>,
    state: AtomicU8,
    metadata: RwLock<HashMap<String, JsonValue>>,
    manager: Weak<Manager>,
    writer: tokio::sync::Mutex<Option<Box<dyn FrameWriter>>>,
    inbound_tx: mpsc::Sender<Frame>,
    events_tx: mpsc::Sender<Envelope>,
    outbound_tx: mpsc::Sender<Frame>,
    mailboxes: Mutex<Option<Mailboxes>>,
    close_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    config: SessionConfig,
}

impl Session {
    /// Creates a session in the `Created` state over the given connection halves.
    pub fn new(
        id: SessionId,
        client_ip: impl Into<String>,
        manager: &Arc<Manager>,
        reader: Box<dyn FrameReader>,
        writer: Box<dyn FrameWriter>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));

        Arc::new(Self {
            id,
            client_ip: client_ip.into(),
            last_seen_at: Mutex::new(Timestamp::now()),
            state: AtomicU8::new(SessionState::Created.as_u8()),
            metadata: RwLock::new(HashMap::new()),
            manager: Arc::downgrade(manager),
            writer: tokio::sync::Mutex::new(Some(writer)),
            inbound_tx,
            events_tx,
            outbound_tx,
            mailboxes: Mutex::new(Some(Mailboxes {
                reader,
                inbound_rx,
                events_rx,
                outbound_rx,
            })),
            close_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            config,
        })
    }

    pub fn id(&self) -> &str {
        self.id.as_str()
    }

    pub fn session_id(&self) -> &SessionId {
        &self.id
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    /// Last time the client answered a ping.
    pub fn last_seen_at(&self) -> Timestamp {
        *self.last_seen_at.lock()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Copy of the session metadata.
    pub fn metadata(&self) -> HashMap<String, JsonValue> {
        self.metadata.read().clone()
    }

    pub fn metadata_value(&self, key: &str) -> Option<JsonValue> {
        self.metadata.read().get(key).cloned()
    }

    /// Resolves once the session has been closed.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    fn touch(&self) {
        *self.last_seen_at.lock() = Timestamp::now();
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        if !from.can_transition_to(to) {
            return false;
        }
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Activates the session: registers it, routes `s.<id>` to it and spawns its loops.
    pub async fn start(self: &Arc<Self>) -> Result<(), DomainError> {
        if !self.transition(SessionState::Created, SessionState::Active) {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("session {} cannot start from {}", self.id, self.state()),
            ));
        }

        let Some(manager) = self.manager.upgrade() else {
            self.close().await;
            return Err(DomainError::new(ErrorCode::InternalError, "manager is gone"));
        };
        let mailboxes = self.mailboxes.lock().take();
        let Some(mailboxes) = mailboxes else {
            self.close().await;
            return Err(DomainError::new(ErrorCode::InternalError, "session already started"));
        };

        manager.add_session(self.clone());

        if let Err(e) = self.add_session_route(&manager).await {
            tracing::warn!(session_id = %self.id, error = %e, "Failed to route session topic");
            self.close().await;
            return Err(e);
        }

        let Mailboxes {
            reader,
            inbound_rx,
            events_rx,
            outbound_rx,
        } = mailboxes;

        tokio::spawn(self.clone().run_inbound(reader));
        tokio::spawn(self.clone().run_processing(inbound_rx));
        tokio::spawn(self.clone().run_events(events_rx));
        tokio::spawn(self.clone().run_writer(outbound_rx));
        if self.config.enable_route_heartbeat && !self.config.route_heartbeat_interval.is_zero() {
            tokio::spawn(self.clone().run_heartbeat());
        }

        tracing::info!(session_id = %self.id, client_ip = %self.client_ip, "Session started");
        Ok(())
    }

    async fn add_session_route(self: &Arc<Self>, manager: &Manager) -> Result<(), DomainError> {
        let router = manager.router().ok_or_else(|| {
            DomainError::new(ErrorCode::InternalError, "hub has no router bound")
        })?;

        let session = Arc::downgrade(self);
        router
            .add_route(&self.id.topic(), move |ctx: Context| {
                let session = session.clone();
                async move {
                    match session.upgrade() {
                        Some(session) => session.send_envelope(ctx.envelope().clone()),
                        None => Ok(()),
                    }
                }
            })
            .await?;
        Ok(())
    }

    /// Queues an envelope for delivery to the client.
    ///
    /// Dropped with a warning when the event mailbox is full.
    pub fn send_envelope(&self, envelope: Envelope) -> Result<(), DomainError> {
        if !self.is_active() {
            return Err(DomainError::new(
                ErrorCode::SessionClosed,
                format!("session {} is closed", self.id),
            ));
        }

        if let Err(e) = self.events_tx.try_send(envelope) {
            tracing::warn!(session_id = %self.id, error = %e, "Event mailbox rejected envelope");
        }
        Ok(())
    }

    fn send_frame(&self, frame: Frame) {
        if let Err(e) = self.outbound_tx.try_send(frame) {
            tracing::warn!(session_id = %self.id, error = %e, "Outbound mailbox rejected frame");
        }
    }

    /// Closes the session. Only the first call has any effect.
    pub async fn close(&self) {
        let _guard = self.close_lock.lock().await;

        let state = self.state();
        if state == SessionState::Closed {
            return;
        }
        if state == SessionState::Created {
            self.state.store(SessionState::Closed.as_u8(), Ordering::SeqCst);
            self.cancel.cancel();
            return;
        }

        self.state.store(SessionState::Closing.as_u8(), Ordering::SeqCst);
        self.cancel.cancel();

        if let Some(mut writer) = self.writer.lock().await.take() {
            let timeout = self.config.write_timeout;
            let closed = if timeout.is_zero() {
                writer.close().await
            } else {
                tokio::time::timeout(timeout, writer.close())
                    .await
                    .unwrap_or_else(|_| Err(TransportError::Io("close timed out".to_string())))
            };
            if let Err(e) = closed {
                tracing::debug!(session_id = %self.id, error = %e, "Socket close failed");
            }
        }

        // A newer session may have taken over this id; its route stays.
        if let Some(manager) = self.manager.upgrade().filter(|m| m.delete_session(self)) {
            if let Some(router) = manager.router() {
                if let Err(e) = router.remove_route(&self.id.topic()).await {
                    tracing::warn!(session_id = %self.id, error = %e, "Failed to remove session route");
                }
            }
        }

        self.state.store(SessionState::Closed.as_u8(), Ordering::SeqCst);
        tracing::info!(session_id = %self.id, "Session closed");
    }

    // === Loops ===

    async fn run_inbound(self: Arc<Self>, mut reader: Box<dyn FrameReader>) {
        let idle = self.config.idle_read_timeout;
        let mut deadline = Instant::now() + idle;

        loop {
            let read = tokio::select! {
                _ = self.cancel.cancelled() => break,
                read = read_before(reader.as_mut(), idle, deadline) => read,
            };

            let frame = match read {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::debug!(session_id = %self.id, "Peer hung up");
                    break;
                }
                Err(ReadError::Timeout) => {
                    tracing::debug!(session_id = %self.id, "Read deadline passed");
                    break;
                }
                Err(ReadError::Transport(e)) => {
                    tracing::debug!(session_id = %self.id, error = %e, "Read failed");
                    break;
                }
            };

            match frame {
                Frame::Close => break,
                Frame::Pong(_) => {
                    self.touch();
                    deadline = Instant::now() + idle;
                }
                Frame::Ping(_) => {}
                frame => {
                    let limit = self.config.max_frame_size;
                    if limit > 0 && frame.len() > limit {
                        let e = TransportError::FrameTooLarge {
                            size: frame.len(),
                            limit,
                        };
                        tracing::warn!(session_id = %self.id, error = %e, "Closing session");
                        break;
                    }

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        sent = self.inbound_tx.send(frame) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.close().await;
    }

    async fn run_processing(self: Arc<Self>, mut inbound_rx: mpsc::Receiver<Frame>) {
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = inbound_rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let Frame::Text(text) = frame else {
                tracing::debug!(session_id = %self.id, "Ignoring non-text frame");
                continue;
            };

            let envelope = match self.prepare_inbound(&text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(session_id = %self.id, error = %e, "Dropping invalid client message");
                    continue;
                }
            };

            let Some(manager) = self.manager.upgrade() else {
                break;
            };
            tracing::debug!(
                session_id = %self.id,
                topic = %envelope.event_type,
                "Client envelope received"
            );
            manager.add_envelope_to_hub(envelope);
        }
    }

    /// Turns a client text frame into a broker-ready envelope.
    fn prepare_inbound(&self, text: &str) -> Result<Envelope, DomainError> {
        let mut envelope = Envelope::from_slice(text.as_bytes())?;
        if envelope.id.is_empty() {
            envelope.id = Uuid::new_v4().to_string();
        }
        envelope.validate()?;

        for (key, value) in self.metadata.read().iter() {
            envelope.set_extension(key, value.clone());
        }
        envelope.set_session_id(self.id.as_str());
        Ok(envelope)
    }

    async fn run_events(self: Arc<Self>, mut events_rx: mpsc::Receiver<Envelope>) {
        loop {
            let envelope = tokio::select! {
                _ = self.cancel.cancelled() => break,
                envelope = events_rx.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            if envelope.event_type == METADATA_ADD {
                self.apply_metadata(&envelope);
                continue;
            }

            match serde_json::to_string(&envelope) {
                Ok(text) => self.send_frame(Frame::Text(text)),
                Err(e) => {
                    tracing::warn!(session_id = %self.id, error = %e, "Failed to encode envelope");
                }
            }
        }
    }

    fn apply_metadata(&self, envelope: &Envelope) {
        match envelope.data_as::<MetadataItem>() {
            Ok(item) => {
                tracing::debug!(session_id = %self.id, key = %item.key, "Session metadata updated");
                self.metadata.write().insert(item.key, item.value);
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Invalid metadata item");
            }
        }
    }

    async fn run_writer(self: Arc<Self>, mut outbound_rx: mpsc::Receiver<Frame>) {
        let period = self.config.ping_period;
        let mut ticker =
            (!period.is_zero()).then(|| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = outbound_rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
                _ = next_tick(&mut ticker) => Frame::Ping(Vec::new()),
            };

            if let Err(e) = self.write(frame).await {
                tracing::debug!(session_id = %self.id, error = %e, "Write failed");
                break;
            }
        }

        self.close().await;
    }

    async fn write(&self, frame: Frame) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        let timeout = self.config.write_timeout;

        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::Closed),
            written = async {
                if timeout.is_zero() {
                    writer.write_frame(frame).await
                } else {
                    tokio::time::timeout(timeout, writer.write_frame(frame))
                        .await
                        .map_err(|_| TransportError::Io("write timed out".to_string()))?
                }
            } => written,
        }
    }

    async fn run_heartbeat(self: Arc<Self>) {
        let period = self.config.route_heartbeat_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(manager) = self.manager.upgrade() else {
                break;
            };
            match manager.update_route_info(&self) {
                Ok(()) => tracing::debug!(
                    session_id = %self.id,
                    last_seen_at = %self.last_seen_at(),
                    "Session route refreshed"
                ),
                Err(e) => tracing::warn!(session_id = %self.id, error = %e, "Route refresh failed"),
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("client_ip", &self.client_ip)
            .field("state", &self.state())
            .finish()
    }
}

enum ReadError {
    Timeout,
    Transport(TransportError),
}

async fn read_before(
    reader: &mut dyn FrameReader,
    idle: Duration,
    deadline: Instant,
) -> Result<Option<Frame>, ReadError> {
    if idle.is_zero() {
        return reader.read_frame().await.map_err(ReadError::Transport);
    }
    match tokio::time::timeout_at(deadline, reader.read_frame()).await {
        Ok(read) => read.map_err(ReadError::Transport),
        Err(_) => Err(ReadError::Timeout),
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::hub::InMemoryHub;
    use crate::adapters::transport::{in_memory_pair, InMemoryPeer};
    use crate::application::Router;
    use crate::domain::foundation::{SESSION_CLOSED_TOPIC, ROUTE_INFO_TOPIC};
    use crate::gateway::ManagerConfig;
    use crate::ports::Hub;
    use async_trait::async_trait;
    use serde_json::json;

    struct Harness {
        hub: Arc<InMemoryHub>,
        router: Arc<Router>,
        manager: Arc<Manager>,
    }

    impl Harness {
        fn new() -> Self {
            let hub = Arc::new(InMemoryHub::new());
            let router = Router::new("prelude", hub.clone());
            let manager = Manager::new(
                hub.clone(),
                ManagerConfig::default()
                    .with_bucket_count(4)
                    .with_bucket_worker_count(1)
                    .with_gateway_addr("gw-test"),
            );
            manager.start();
            Self { hub, router, manager }
        }

        fn session(&self, id: &str, config: SessionConfig) -> (Arc<Session>, InMemoryPeer) {
            let (reader, writer, peer) = in_memory_pair(16);
            let session = Session::new(
                SessionId::from(id),
                "127.0.0.1",
                &self.manager,
                Box::new(reader),
                Box::new(writer),
                config,
            );
            (session, peer)
        }
    }

    fn quiet_config() -> SessionConfig {
        SessionConfig {
            ping_period: Duration::ZERO,
            idle_read_timeout: Duration::ZERO,
            enable_route_heartbeat: false,
            ..SessionConfig::default()
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        check()
    }

    #[tokio::test]
    async fn start_registers_session_and_route() {
        let h = Harness::new();
        let (session, _peer) = h.session("S1", quiet_config());

        session.start().await.unwrap();

        assert!(session.is_active());
        assert_eq!(h.manager.status().online_people(), 1);
        assert!(h.manager.session("S1").is_some());
        assert!(h.router.find("s.S1").is_some());
        assert!(h.hub.is_subscribed("s.S1"));
    }

    #[tokio::test]
    async fn starting_twice_fails() {
        let h = Harness::new();
        let (session, _peer) = h.session("S1", quiet_config());

        session.start().await.unwrap();
        let err = session.start().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidStateTransition);
    }

    #[tokio::test]
    async fn client_envelope_is_stamped_and_forwarded() {
        let h = Harness::new();
        let (session, peer) = h.session("S1", quiet_config());
        session.start().await.unwrap();

        peer.send(Frame::Text(r#"{"type":"chat.send","data":{"text":"hi"},"sessionid":"spoofed"}"#.into()))
            .await
            .unwrap();

        assert!(eventually(|| !h.hub.published_to("chat.send").is_empty()).await);
        let forwarded = &h.hub.published_to("chat.send")[0];
        assert_eq!(forwarded.session_id(), Some("S1"));
        assert!(!forwarded.id.is_empty());
    }

    #[tokio::test]
    async fn malformed_client_messages_are_dropped() {
        let h = Harness::new();
        let (session, peer) = h.session("S1", quiet_config());
        session.start().await.unwrap();

        peer.send(Frame::Text("not json".into())).await.unwrap();
        peer.send(Frame::Text(r#"{"type":""}"#.into())).await.unwrap();
        peer.send(Frame::Binary(vec![1, 2, 3])).await.unwrap();
        peer.send(Frame::Text(r#"{"type":"after"}"#.into())).await.unwrap();

        assert!(eventually(|| !h.hub.published_to("after").is_empty()).await);
        assert!(session.is_active());
        assert_eq!(h.hub.published_count(), 1);
    }

    #[tokio::test]
    async fn broker_envelope_reaches_client() {
        let h = Harness::new();
        let (session, mut peer) = h.session("S1", quiet_config());
        session.start().await.unwrap();

        let envelope = Envelope::new("pong").with_json("ok").unwrap();
        h.hub.publish("s.S1", &envelope).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), peer.recv_envelope())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.event_type, "pong");
        assert_eq!(received.data, br#""ok""#);
    }

    #[tokio::test]
    async fn metadata_add_updates_session_and_later_envelopes() {
        let h = Harness::new();
        let (session, peer) = h.session("S1", quiet_config());
        session.start().await.unwrap();

        let item = MetadataItem {
            key: "room".into(),
            value: json!("lobby"),
        };
        let envelope = Envelope::new(METADATA_ADD).with_json(&item).unwrap();
        h.hub.publish("s.S1", &envelope).await.unwrap();

        assert!(eventually(|| session.metadata_value("room").is_some()).await);

        peer.send(Frame::Text(r#"{"type":"chat.send"}"#.into())).await.unwrap();
        assert!(eventually(|| !h.hub.published_to("chat.send").is_empty()).await);
        let forwarded = &h.hub.published_to("chat.send")[0];
        assert_eq!(forwarded.extension("room"), Some(&json!("lobby")));
    }

    #[tokio::test]
    async fn oversize_frame_closes_session() {
        let h = Harness::new();
        let config = SessionConfig {
            max_frame_size: 16,
            ..quiet_config()
        };
        let (session, peer) = h.session("S1", config);
        session.start().await.unwrap();

        peer.send(Frame::Text("x".repeat(64))).await.unwrap();

        assert!(eventually(|| session.state() == SessionState::Closed).await);
        assert_eq!(h.manager.status().online_people(), 0);
    }

    #[tokio::test]
    async fn peer_hangup_closes_session_and_announces_it() {
        let h = Harness::new();
        let (session, mut peer) = h.session("S1", quiet_config());
        session.start().await.unwrap();

        peer.disconnect();

        assert!(eventually(|| session.state() == SessionState::Closed).await);
        assert!(h.router.find("s.S1").is_none());
        assert!(h.manager.session("S1").is_none());
        assert!(eventually(|| !h.hub.published_to(SESSION_CLOSED_TOPIC).is_empty()).await);
    }

    #[tokio::test]
    async fn concurrent_close_tears_down_once() {
        let h = Harness::new();
        let (session, peer) = h.session("S1", quiet_config());
        session.start().await.unwrap();

        let closers: Vec<_> = (0..16)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.close().await })
            })
            .collect();
        for closer in closers {
            closer.await.unwrap();
        }

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(peer.close_count(), 1);
        assert_eq!(h.manager.status().online_people(), 0);
        assert!(eventually(|| h.hub.published_to(SESSION_CLOSED_TOPIC).len() == 1).await);
    }

    #[tokio::test]
    async fn closed_session_rejects_sends() {
        let h = Harness::new();
        let (session, _peer) = h.session("S1", quiet_config());
        session.start().await.unwrap();
        session.close().await;

        let err = session.send_envelope(Envelope::new("late")).unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionClosed);
    }

    #[tokio::test]
    async fn failed_write_closes_session() {
        let h = Harness::new();
        let (session, peer) = h.session("S1", quiet_config());
        session.start().await.unwrap();

        peer.break_writes();
        session.send_envelope(Envelope::new("notice")).unwrap();

        assert!(eventually(|| session.state() == SessionState::Closed).await);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_read_timeout_closes_session() {
        let h = Harness::new();
        let config = SessionConfig {
            idle_read_timeout: Duration::from_secs(60),
            ..quiet_config()
        };
        let (session, _peer) = h.session("S1", config);
        session.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        session.closed().await;
        assert!(eventually(|| session.state() == SessionState::Closed).await);
        assert_eq!(h.manager.status().online_people(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pong_refreshes_read_deadline() {
        let h = Harness::new();
        let config = SessionConfig {
            idle_read_timeout: Duration::from_secs(60),
            ..quiet_config()
        };
        let (session, peer) = h.session("S1", config);
        session.start().await.unwrap();
        let first_seen = session.last_seen_at();

        tokio::time::sleep(Duration::from_secs(40)).await;
        peer.send(Frame::Pong(Vec::new())).await.unwrap();
        tokio::time::sleep(Duration::from_secs(40)).await;

        assert!(session.is_active());
        assert!(session.last_seen_at() >= first_seen);
    }

    #[tokio::test(start_paused = true)]
    async fn writer_sends_pings_on_period() {
        let h = Harness::new();
        let config = SessionConfig {
            ping_period: Duration::from_secs(20),
            ..quiet_config()
        };
        let (session, mut peer) = h.session("S1", config);
        session.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(peer.recv().await, Some(Frame::Ping(Vec::new())));
        assert!(session.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_publishes_route_info() {
        let h = Harness::new();
        let config = SessionConfig {
            enable_route_heartbeat: true,
            route_heartbeat_interval: Duration::from_secs(60),
            ..quiet_config()
        };
        let (session, _peer) = h.session("S1", config);
        session.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(eventually(|| !h.hub.published_to(ROUTE_INFO_TOPIC).is_empty()).await);

        let info: crate::domain::foundation::RouteInfo =
            h.hub.published_to(ROUTE_INFO_TOPIC)[0].data_as().unwrap();
        assert_eq!(info.session_id, "S1");
        assert_eq!(info.gateway_addr, "gw-test");
    }
    /// Writer for a peer that stopped reading: every call stays pending.
    struct StalledWriter;

    #[async_trait]
    impl FrameWriter for StalledWriter {
        async fn write_frame(&mut self, _frame: Frame) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_peer_is_torn_down_after_write_timeouts() {
        let h = Harness::new();
        let (reader, _writer, _peer) = in_memory_pair(16);
        let config = SessionConfig {
            write_timeout: Duration::from_secs(1),
            ..quiet_config()
        };
        let session = Session::new(
            SessionId::from("S1"),
            "127.0.0.1",
            &h.manager,
            Box::new(reader),
            Box::new(StalledWriter),
            config,
        );
        session.start().await.unwrap();

        session.send_envelope(Envelope::new("pong")).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(eventually(|| session.state() == SessionState::Closed).await);
        assert_eq!(h.manager.status().online_people(), 0);
        assert!(h.manager.session("S1").is_none());
        assert!(!h.hub.is_subscribed("s.S1"));
    }

    #[tokio::test]
    async fn closing_a_replaced_session_keeps_its_successor_reachable() {
        let h = Harness::new();
        let (old, _old_peer) = h.session("S1", quiet_config());
        old.start().await.unwrap();
        let (new, mut new_peer) = h.session("S1", quiet_config());
        new.start().await.unwrap();

        old.close().await;

        assert!(new.is_active());
        assert_eq!(h.manager.status().online_people(), 1);
        assert!(Arc::ptr_eq(&h.manager.session("S1").unwrap(), &new));
        assert!(h.hub.is_subscribed("s.S1"));
        assert!(h.router.find("s.S1").is_some());

        h.hub
            .publish("s.S1", &Envelope::new("still.here"))
            .await
            .unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), new_peer.recv_envelope())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.event_type, "still.here");
    }
}
