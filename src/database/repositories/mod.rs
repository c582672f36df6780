//! Repository layer for bookforge.

pub mod queue;

pub use queue::{QueueRepository, SqlxQueueRepository, StatusCount};
