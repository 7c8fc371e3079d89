//! Hub adapters - implementations of the `Hub` port.
//!
//! - `InMemoryHub` - in-process delivery, used by tests and single-node runs
//! - `RedisHub` - Redis streams and pub/sub for multi-node deployments

mod in_memory;
mod redis;

pub use in_memory::{InMemoryHub, DEFAULT_SUBSCRIPTION_CAPACITY};
pub use self::redis::{RedisHub, RedisHubConfig};
