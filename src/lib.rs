//! Prelude Gateway - real-time connection gateway
//!
//! Terminates long-lived client connections, tags every inbound envelope with
//! its session id and relays it through a pub/sub hub. Replies published to
//! `s.<session id>` are routed back to the owning connection.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod ports;
