//! Strongly-typed identifier value objects.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix of the broker topic addressing a single session.
pub const SESSION_TOPIC_PREFIX: &str = "s.";

/// Unique identifier for a client connection.
///
/// Generated server-side (UUID v4) when a connection is accepted, but any
/// non-empty string is accepted so ids minted by other gateways round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a new random SessionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a SessionId from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Broker topic that delivers to this session, `s.<id>`.
    pub fn topic(&self) -> String {
        session_topic(&self.0)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds the session-addressed topic for a raw session id.
pub fn session_topic(session_id: &str) -> String {
    format!("{}{}", SESSION_TOPIC_PREFIX, session_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_ids_are_unique_uuids() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn topic_uses_reserved_prefix() {
        let id = SessionId::from("S1");
        assert_eq!(id.topic(), "s.S1");
        assert_eq!(session_topic("abc"), "s.abc");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = SessionId::from("abc123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc123\"");
    }
}
