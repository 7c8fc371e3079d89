//! Per-connection session configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::gateway::SessionConfig;

/// Session configuration. A zero timeout or size disables that check.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_capacity")]
    pub inbound_capacity: usize,

    #[serde(default = "default_capacity")]
    pub outbound_capacity: usize,

    #[serde(default = "default_capacity")]
    pub event_capacity: usize,

    /// Close the session when no pong arrives within this many seconds
    #[serde(default = "default_idle_read_timeout")]
    pub idle_read_timeout_secs: u64,

    /// Largest accepted client frame in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    #[serde(default = "default_ping_period")]
    pub ping_period_secs: u64,

    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    #[serde(default = "default_enable_route_heartbeat")]
    pub enable_route_heartbeat: bool,

    #[serde(default = "default_route_heartbeat_interval")]
    pub route_heartbeat_interval_secs: u64,
}

impl SessionSettings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            inbound_capacity: self.inbound_capacity,
            outbound_capacity: self.outbound_capacity,
            event_capacity: self.event_capacity,
            idle_read_timeout: Duration::from_secs(self.idle_read_timeout_secs),
            max_frame_size: self.max_frame_size,
            ping_period: Duration::from_secs(self.ping_period_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            enable_route_heartbeat: self.enable_route_heartbeat,
            route_heartbeat_interval: Duration::from_secs(self.route_heartbeat_interval_secs),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.inbound_capacity == 0 {
            return Err(ValidationError::ZeroValue("session.inbound_capacity"));
        }
        if self.outbound_capacity == 0 {
            return Err(ValidationError::ZeroValue("session.outbound_capacity"));
        }
        if self.event_capacity == 0 {
            return Err(ValidationError::ZeroValue("session.event_capacity"));
        }
        if self.idle_read_timeout_secs > 0 && self.ping_period_secs >= self.idle_read_timeout_secs {
            return Err(ValidationError::PingPeriodTooLong);
        }
        if self.enable_route_heartbeat && self.route_heartbeat_interval_secs == 0 {
            return Err(ValidationError::ZeroValue("session.route_heartbeat_interval_secs"));
        }
        Ok(())
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            inbound_capacity: default_capacity(),
            outbound_capacity: default_capacity(),
            event_capacity: default_capacity(),
            idle_read_timeout_secs: default_idle_read_timeout(),
            max_frame_size: default_max_frame_size(),
            ping_period_secs: default_ping_period(),
            write_timeout_secs: default_write_timeout(),
            enable_route_heartbeat: default_enable_route_heartbeat(),
            route_heartbeat_interval_secs: default_route_heartbeat_interval(),
        }
    }
}

fn default_capacity() -> usize {
    128
}

fn default_idle_read_timeout() -> u64 {
    60
}

fn default_max_frame_size() -> usize {
    2048
}

fn default_ping_period() -> u64 {
    20
}

fn default_write_timeout() -> u64 {
    10
}

fn default_enable_route_heartbeat() -> bool {
    true
}

fn default_route_heartbeat_interval() -> u64 {
    60
}
