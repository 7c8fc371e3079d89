//! Transport adapters that are not tied to a network protocol.

mod in_memory;

pub use in_memory::{in_memory_pair, InMemoryPeer, InMemoryReader, InMemoryWriter};
