//! Application configuration module
//!
//! Configuration is read from environment variables with the `PRELUDE_GATEWAY`
//! prefix, using `__` (double underscore) between nested keys. Every value has
//! a default, so an empty environment yields a runnable in-memory gateway.
//!
//! # Example
//!
//! ```no_run
//! use prelude_gateway::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod error;
mod gateway;
mod redis;
mod server;
mod session;

pub use error::{ConfigError, ValidationError};
pub use gateway::GatewayConfig;
pub use redis::RedisConfig;
pub use server::ServerConfig;
pub use session::SessionSettings;

use serde::Deserialize;

/// Root application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// HTTP listener and process settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Broker connection; absent means the in-memory hub
    #[serde(default)]
    pub redis: RedisConfig,

    /// Session registry sharding and routing
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Per-connection limits and timers
    #[serde(default)]
    pub session: SessionSettings,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// - `PRELUDE_GATEWAY__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `PRELUDE_GATEWAY__REDIS__URL=redis://...` -> `redis.url`
    ///
    /// A `.env` file is loaded first when present.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("PRELUDE_GATEWAY")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.redis.validate()?;
        self.gateway.validate()?;
        self.session.validate()?;
        Ok(())
    }
}
