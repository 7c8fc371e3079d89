//! WebSocket adapters - the gateway's client-facing surface.
//!
//! # Components
//!
//! - [`handler`] - Axum router: websocket upgrade, status and ping endpoints
//! - [`transport`] - Websocket halves implementing the transport ports

pub mod handler;
pub mod transport;

pub use handler::{client_ip, gateway_router, ping_handler, status_handler, ws_handler, GatewayState};
pub use transport::{split_socket, WsFrameReader, WsFrameWriter};
