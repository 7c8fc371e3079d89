//! Domain layer containing gateway value objects and rules.
//!
//! # Module Organization
//!
//! - `foundation` - Envelope, identifiers, session lifecycle, errors
pub mod foundation;
