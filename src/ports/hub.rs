//! Hub port - Interface to the pub/sub broker.
//!
//! The hub publishes envelopes to named topics and feeds broker deliveries
//! back into the [`Router`]. Router and hub reference each other: the router
//! owns the hub, the hub holds a weak reference to the router that is bound
//! once during construction.
//!
//! ```ignore
//! let hub: Arc<dyn Hub> = Arc::new(InMemoryHub::new());
//! let router = Router::new("prelude", hub.clone());   // binds hub -> router
//! router.add_route("ping", handler).await?;            // queue-subscribes "ping"
//! ```

use async_trait::async_trait;
use std::sync::{Arc, Weak};
use thiserror::Error;

use crate::application::Router;
use crate::domain::foundation::{DomainError, Envelope, ErrorCode, ValidationError};

/// Errors raised by hub implementations.
#[derive(Debug, Error)]
pub enum HubError {
    /// Envelope could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Envelope failed validation before publication.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(#[from] ValidationError),

    /// Broker rejected the request or is unreachable.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::Serialization(err.to_string())
    }
}

impl From<HubError> for DomainError {
    fn from(err: HubError) -> Self {
        let code = match &err {
            HubError::Serialization(_) => ErrorCode::SerializationFailed,
            HubError::InvalidEnvelope(_) => ErrorCode::InvalidEnvelope,
            HubError::Unavailable(_) => ErrorCode::BrokerUnavailable,
        };
        DomainError::new(code, err.to_string())
    }
}

/// Port for the pub/sub broker.
///
/// Implementations must ensure:
/// - Deliveries within one subscription reach the router in order
/// - Handler failures are logged, never propagated to the broker
/// - `publish` validates the envelope before it leaves the process
#[async_trait]
pub trait Hub: Send + Sync {
    /// Router receiving deliveries, if bound and still alive.
    fn router(&self) -> Option<Arc<Router>>;

    /// Binds the router. Called once by [`Router::new`].
    fn set_router(&self, router: Weak<Router>);

    /// Publishes an envelope on `topic`.
    async fn publish(&self, topic: &str, envelope: &Envelope) -> Result<(), HubError>;

    /// Joins this process to `topic` so deliveries are dispatched through the router.
    async fn queue_subscribe(&self, topic: &str) -> Result<(), HubError>;

    /// Leaves `topic`. Unknown topics are ignored.
    async fn unsubscribe(&self, _topic: &str) -> Result<(), HubError> {
        Ok(())
    }
}

/// Validates and encodes an envelope for the broker.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, HubError> {
    envelope.validate()?;
    Ok(serde_json::to_vec(envelope)?)
}

/// Decodes an envelope received from the broker.
pub fn decode_envelope(payload: &[u8]) -> Result<Envelope, HubError> {
    Ok(serde_json::from_slice(payload)?)
}
