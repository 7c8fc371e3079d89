//! HTTP surface of the gateway.
//!
//! - `GET /` upgrades to a websocket and serves it as a new session
//! - `GET /status` returns the online counter
//! - `GET /ping` answers with the caller's address

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::HeaderMap,
    response::Response,
    routing::get,
    Json,
};
use tower_http::trace::TraceLayer;

use crate::domain::foundation::SessionId;
use crate::gateway::{Manager, Session, SessionConfig, StatusSnapshot};

use super::transport::split_socket;

/// State shared by the gateway HTTP handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub manager: Arc<Manager>,
    pub session_config: SessionConfig,
}

impl GatewayState {
    pub fn new(manager: Arc<Manager>, session_config: SessionConfig) -> Self {
        Self {
            manager,
            session_config,
        }
    }
}

/// Resolves the client address, preferring proxy headers.
pub fn client_ip(headers: &HeaderMap, peer: &SocketAddr) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

/// Largest message the websocket codec buffers, or `None` when frames are unbounded.
pub fn codec_message_limit(max_frame_size: usize) -> Option<usize> {
    (max_frame_size > 0).then_some(max_frame_size)
}

/// Upgrades the request and runs the connection as a session.
///
/// Oversized messages are rejected by the codec before they are buffered.
///
/// Route: `GET /`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<GatewayState>,
) -> Response {
    let client_ip = client_ip(&headers, &peer);
    let ws = match codec_message_limit(state.session_config.max_frame_size) {
        Some(limit) => ws.max_message_size(limit).max_frame_size(limit),
        None => ws,
    };
    ws.on_upgrade(move |socket| async move {
        let (reader, writer) = split_socket(socket);
        let session = Session::new(
            SessionId::new(),
            client_ip,
            &state.manager,
            Box::new(reader),
            Box::new(writer),
            state.session_config.clone(),
        );

        if let Err(e) = session.start().await {
            tracing::warn!(session_id = %session.id(), error = %e, "Session failed to start");
            return;
        }
        session.closed().await;
        tracing::debug!(session_id = %session.id(), "Websocket handler finished");
    })
}

/// Route: `GET /status`
pub async fn status_handler(State(state): State<GatewayState>) -> Json<StatusSnapshot> {
    Json(state.manager.status().snapshot())
}

/// Route: `GET /ping`
pub async fn ping_handler(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> String {
    format!("[{}] pong!!!", client_ip(&headers, &peer))
}

/// Creates the axum router for the gateway endpoints.
///
/// Serve it with connect info so handlers can see the peer address:
///
/// ```ignore
/// axum::serve(
///     listener,
///     gateway_router(state).into_make_service_with_connect_info::<SocketAddr>(),
/// )
/// ```
pub fn gateway_router(state: GatewayState) -> axum::Router {
    axum::Router::new()
        .route("/", get(ws_handler))
        .route("/status", get(status_handler))
        .route("/ping", get(ping_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
