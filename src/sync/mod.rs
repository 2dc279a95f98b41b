//! Durable queues of offline writes and their replay.

mod processor;
mod queue;
mod registry;

pub use processor::{DrainReport, SyncQueueProcessor};
pub use queue::{QueueEntry, QueueStorage};
pub use registry::QueueRegistry;
