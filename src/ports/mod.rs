//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the gateway core and the outside world. Adapters implement these ports.
//!
//! - `Hub` - Pub/sub broker binding
//! - `FrameReader` / `FrameWriter` - Client connection halves

mod hub;
mod transport;

pub use hub::{decode_envelope, encode_envelope, Hub, HubError};
pub use transport::{Frame, FrameReader, FrameWriter, TransportError};
