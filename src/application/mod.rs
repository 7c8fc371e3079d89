//! Application layer - topic routing and handler context.
//!
//! The router maps broker topics to handlers; handlers receive a `Context`
//! that reads the inbound envelope and publishes replies.

mod context;
mod router;

pub use context::Context;
pub use router::{NodeKind, RouteHandler, Router};
