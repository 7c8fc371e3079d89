//! Gateway core - session registry, per-connection sessions and status.
//!
//! - `Manager` - shards sessions into buckets and forwards envelopes to the hub
//! - `Bucket` - one registry shard with its own worker pool
//! - `Session` - a client connection and its loops
//! - `Status` - online counters

mod bucket;
mod manager;
mod session;
mod status;

pub use bucket::{Bucket, Job};
pub use manager::{fnv32a, Manager, ManagerConfig};
pub use session::{Session, SessionConfig};
pub use status::{Status, StatusSnapshot};
