//! Durable work queues and worker pools.
//!
//! Three independent queues (download, text-extraction, speech-synthesis)
//! share one SQLite-backed store so enqueued work survives process restarts.
//! Each queue gets a bounded worker pool that claims the next eligible entry
//! (priority, then FIFO), executes it against the matching external
//! collaborator, and reports the outcome back through the queue. Failed
//! attempts are rescheduled with capped exponential backoff until the
//! queue's attempt budget is exhausted.

mod backoff;
mod download_manager;
mod executors;
mod payload;
mod work_queue;
mod worker;

pub use crate::database::models::{EntryStatus, QueueKind};
pub use backoff::{backoff_delay, backoff_delay_with_jitter};
pub use download_manager::{DownloadManager, DownloadStats, normalize_url};
pub use executors::{DownloadExecutor, ExtractionExecutor, SynthesisExecutor};
pub use payload::{PRIORITY_AD_HOC, PRIORITY_PIPELINE, WorkOutput, WorkPayload};
pub use work_queue::{EnqueueOutcome, EnqueueResult, WorkQueue};
pub use worker::{WorkExecutor, WorkerPool};
