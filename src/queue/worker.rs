//! Worker pool implementation for queue processing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::database::models::{QueueEntryDbModel, QueueKind};
use crate::pipeline::JobStore;
use crate::queue::payload::{WorkOutput, WorkPayload};
use crate::queue::work_queue::WorkQueue;
use crate::{Error, Result};

/// Poll interval for workers between queue checks.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Executes one kind of work unit against its external collaborator.
#[async_trait]
pub trait WorkExecutor: Send + Sync {
    /// The queue kind this executor serves.
    fn queue_kind(&self) -> QueueKind;

    /// Execute one work unit. The worker applies the attempt timeout.
    async fn execute(&self, payload: &WorkPayload) -> Result<WorkOutput>;
}

/// A bounded pool of workers for one queue.
///
/// Spawns exactly `concurrency` worker tasks; each claims at most one entry
/// at a time, so pool size bounds in-flight executions.
pub struct WorkerPool {
    kind: QueueKind,
    concurrency: usize,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new(kind: QueueKind, concurrency: usize) -> Self {
        Self {
            kind,
            concurrency,
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Start the worker pool.
    pub fn start(
        &self,
        queue: Arc<WorkQueue>,
        executor: Arc<dyn WorkExecutor>,
        jobs: Arc<JobStore>,
    ) {
        info!(
            "Starting {} worker pool with {} workers",
            self.kind, self.concurrency
        );

        let attempt_timeout = queue.policy().attempt_timeout();

        let mut tasks = self.tasks.lock();
        if let Some(join_set) = tasks.as_mut() {
            for i in 0..self.concurrency {
                let cancellation_token = self.cancellation_token.clone();
                let queue = queue.clone();
                let executor = executor.clone();
                let jobs = jobs.clone();
                let notifier = queue.notifier();
                let kind = self.kind;

                join_set.spawn(async move {
                    debug!("{} worker {} started", kind, i);

                    loop {
                        if cancellation_token.is_cancelled() {
                            debug!("{} worker {} shutting down", kind, i);
                            break;
                        }

                        // Wait for a wakeup or fall back to the poll tick
                        // (covers retry entries becoming eligible).
                        tokio::select! {
                            _ = cancellation_token.cancelled() => break,
                            _ = notifier.notified() => {}
                            _ = tokio::time::sleep(POLL_INTERVAL) => {}
                        }

                        loop {
                            let entry = match queue.claim_next().await {
                                Ok(Some(entry)) => entry,
                                Ok(None) => break,
                                Err(e) => {
                                    error!("Error claiming {} entry: {}", kind, e);
                                    break;
                                }
                            };

                            process_entry(
                                &queue,
                                executor.as_ref(),
                                &jobs,
                                &entry,
                                attempt_timeout,
                            )
                            .await;

                            if cancellation_token.is_cancelled() {
                                break;
                            }
                        }
                    }
                });
            }
        }
    }

    /// Stop the worker pool and wait for in-flight work to finish.
    pub async fn stop(&self) {
        info!("Stopping {} worker pool", self.kind);
        self.cancellation_token.cancel();

        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        info!("{} worker pool stopped", self.kind);
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

/// Execute one claimed entry and report its outcome back to the queue.
async fn process_entry(
    queue: &WorkQueue,
    executor: &dyn WorkExecutor,
    jobs: &JobStore,
    entry: &QueueEntryDbModel,
    attempt_timeout: Duration,
) {
    let payload: WorkPayload = match serde_json::from_str(&entry.payload) {
        Ok(payload) => payload,
        Err(e) => {
            // Malformed payloads never become valid; fail without retry.
            error!(entry_id = %entry.id, "Undecodable queue payload: {}", e);
            if let Err(e) = queue
                .repository()
                .mark_failed(&entry.id, &format!("undecodable payload: {}", e))
                .await
            {
                error!(entry_id = %entry.id, "Failed to mark entry failed: {}", e);
            }
            return;
        }
    };

    // Cooperative cancellation: skip work for jobs that are already done.
    if job_is_finished(jobs, entry.job_id.as_deref()) {
        if let Err(e) = queue.cancel_entry(&entry.id).await {
            error!(entry_id = %entry.id, "Failed to cancel entry: {}", e);
        }
        return;
    }

    let result = tokio::time::timeout(attempt_timeout, executor.execute(&payload)).await;

    let outcome = match result {
        Ok(Ok(output)) => {
            // Re-check before committing: the job may have been cancelled
            // while the external call was in flight.
            if job_is_finished(jobs, entry.job_id.as_deref()) {
                queue.cancel_entry(&entry.id).await
            } else {
                queue.complete(&entry.id, &output).await
            }
        }
        Ok(Err(e)) => queue.fail_attempt(entry, &e).await.map(|_| ()),
        Err(_) => {
            let e = Error::timeout(
                format!("{} work unit", entry.kind),
                attempt_timeout.as_secs(),
            );
            queue.fail_attempt(entry, &e).await.map(|_| ())
        }
    };

    if let Err(e) = outcome {
        warn!(entry_id = %entry.id, "Failed to record entry outcome: {}", e);
    }
}

fn job_is_finished(jobs: &JobStore, job_id: Option<&str>) -> bool {
    let Some(job_id) = job_id else {
        return false;
    };
    match jobs.job_status(job_id) {
        Some(status) => status.is_terminal(),
        // Untracked job (e.g. entry recovered after a restart): nothing will
        // consume the result, so resolve the entry instead of executing it.
        None => true,
    }
}
