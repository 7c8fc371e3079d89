//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the gateway core to external systems:
//! - `hub` - Broker bindings (in-memory, Redis)
//! - `websocket` - Axum websocket surface and frame transport
//! - `transport` - In-memory connections for driving sessions in tests

pub mod hub;
pub mod transport;
pub mod websocket;

pub use hub::{InMemoryHub, RedisHub, RedisHubConfig};
pub use transport::{in_memory_pair, InMemoryPeer};
pub use websocket::{gateway_router, GatewayState};
