//! Routing announcements published by the gateway about its sessions.

use serde::{Deserialize, Serialize};

use super::{DomainError, Envelope, Timestamp};

/// Topic on which route announcements are published.
pub const ROUTE_INFO_TOPIC: &str = "events.routes_info";

/// Topic on which session departures are published.
pub const SESSION_CLOSED_TOPIC: &str = "events.session_closed";

/// Announces which gateway instance currently owns a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteInfo {
    pub session_id: String,
    pub gateway_addr: String,
    pub last_seen_at: Timestamp,
}

impl RouteInfo {
    /// Builds the envelope published on [`ROUTE_INFO_TOPIC`].
    pub fn to_envelope(&self, source: &str) -> Result<Envelope, DomainError> {
        Envelope::new(ROUTE_INFO_TOPIC)
            .with_source(source)
            .with_json(self)
    }
}

/// Notification that a session left this gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClosed {
    pub session_id: String,
    pub gateway_addr: String,
}

impl SessionClosed {
    /// Builds the envelope published on [`SESSION_CLOSED_TOPIC`].
    pub fn to_envelope(&self, source: &str) -> Result<Envelope, DomainError> {
        let mut envelope = Envelope::new(SESSION_CLOSED_TOPIC)
            .with_source(source)
            .with_json(self)?;
        envelope.set_session_id(self.session_id.clone());
        Ok(envelope)
    }
}
