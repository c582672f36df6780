//! Database models for bookforge.
//!
//! These models map directly to the database schema; JSON payload fields are
//! serialized/deserialized by the domain layer.

pub mod queue_entry;

pub use queue_entry::*;
