//! Foundation module - Shared domain primitives.
//!
//! Contains the envelope, identifiers, lifecycle enums, and error types
//! that form the vocabulary of the gateway.

mod envelope;
mod errors;
mod ids;
mod route_info;
mod session_state;
mod timestamp;

pub use envelope::{
    Envelope, APPLICATION_JSON, METADATA_ADD, SESSION_ID_EXTENSION, SPEC_VERSION, TEXT_PLAIN,
};
pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::{session_topic, SessionId, SESSION_TOPIC_PREFIX};
pub use route_info::{RouteInfo, SessionClosed, ROUTE_INFO_TOPIC, SESSION_CLOSED_TOPIC};
pub use session_state::SessionState;
pub use timestamp::Timestamp;

use serde::{Deserialize, Serialize};

/// Payload of a `metadata.add` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: serde_json::Value,
}
