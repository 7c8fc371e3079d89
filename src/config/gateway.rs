//! Session registry and routing configuration

use serde::Deserialize;

use super::error::ValidationError;
use crate::gateway::ManagerConfig;

/// Gateway registry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Number of registry shards
    #[serde(default = "default_bucket_count")]
    pub bucket_count: usize,

    /// Broadcast workers per shard
    #[serde(default = "default_bucket_worker_count")]
    pub bucket_worker_count: usize,

    /// Job queue depth per shard
    #[serde(default = "default_bucket_job_capacity")]
    pub bucket_job_capacity: usize,

    /// Envelopes waiting to be published to the hub
    #[serde(default = "default_mailbox_capacity")]
    pub manager_mailbox_capacity: usize,

    /// Router name, used as the source of reply envelopes
    #[serde(default = "default_router_name")]
    pub router_name: String,

    /// Address announced in route info; defaults to the hostname
    #[serde(default)]
    pub gateway_addr: Option<String>,
}

impl GatewayConfig {
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            bucket_count: self.bucket_count,
            bucket_worker_count: self.bucket_worker_count,
            bucket_job_capacity: self.bucket_job_capacity,
            mailbox_capacity: self.manager_mailbox_capacity,
            gateway_addr: self.gateway_addr.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.bucket_count == 0 {
            return Err(ValidationError::ZeroValue("gateway.bucket_count"));
        }
        if self.bucket_worker_count == 0 {
            return Err(ValidationError::ZeroValue("gateway.bucket_worker_count"));
        }
        if self.bucket_job_capacity == 0 {
            return Err(ValidationError::ZeroValue("gateway.bucket_job_capacity"));
        }
        if self.manager_mailbox_capacity == 0 {
            return Err(ValidationError::ZeroValue("gateway.manager_mailbox_capacity"));
        }
        if self.router_name.trim().is_empty() {
            return Err(ValidationError::EmptyRouterName);
        }
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bucket_count: default_bucket_count(),
            bucket_worker_count: default_bucket_worker_count(),
            bucket_job_capacity: default_bucket_job_capacity(),
            manager_mailbox_capacity: default_mailbox_capacity(),
            router_name: default_router_name(),
            gateway_addr: None,
        }
    }
}

fn default_bucket_count() -> usize {
    128
}

fn default_bucket_worker_count() -> usize {
    32
}

fn default_bucket_job_capacity() -> usize {
    1000
}

fn default_mailbox_capacity() -> usize {
    128
}

fn default_router_name() -> String {
    "prelude".to_string()
}
