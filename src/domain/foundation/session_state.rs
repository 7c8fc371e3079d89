//! SessionState enum for the lifecycle of a client connection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a client session.
///
/// `Created -> Active -> Closing -> Closed`. A session that fails to start
/// may go straight from `Created` to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    #[default]
    Created = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    /// Returns true while the session accepts traffic.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }

    /// Encodes the state for storage in an `AtomicU8`.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns true if the lifecycle allows moving from `self` to `target`.
    pub fn can_transition_to(self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Created, Active)
                | (Created, Closed)
                | (Active, Closing)
                | (Active, Closed)
                | (Closing, Closed)
        )
    }

    /// Closed sessions never leave that state.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// Decodes a value previously produced by [`SessionState::as_u8`].
    ///
    /// Unknown values decode as `Closed`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Created,
            1 => SessionState::Active,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "Created",
            SessionState::Active => "Active",
            SessionState::Closing => "Closing",
            SessionState::Closed => "Closed",
        };
        write!(f, "{}", s)
    }
}
