//! Durable work queue over the shared SQLite store.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::QueuePolicy;
use crate::database::models::{EntryStatus, QueueEntryDbModel, QueueKind};
use crate::database::repositories::QueueRepository;
use crate::queue::backoff::backoff_delay_with_jitter;
use crate::queue::payload::{WorkOutput, WorkPayload};
use crate::{Error, Result};

/// Whether an enqueue created a new entry or hit an unresolved duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new entry was created.
    Queued,
    /// An unresolved entry already holds this dedup key.
    Exists,
}

/// Result of an enqueue call.
#[derive(Debug, Clone)]
pub struct EnqueueResult {
    pub entry_id: String,
    pub outcome: EnqueueOutcome,
}

/// One durable FIFO/priority queue.
///
/// Entries are persisted through the repository; in-process observers wait on
/// per-entry watch channels instead of polling the store. Exactly one worker
/// owns an entry between claim and terminal status.
pub struct WorkQueue {
    kind: QueueKind,
    policy: QueuePolicy,
    repo: Arc<dyn QueueRepository>,
    /// Wakes worker pools when new work is eligible.
    notify: Arc<Notify>,
    /// Per-entry status channels for in-process completion signaling.
    watchers: DashMap<String, watch::Sender<EntryStatus>>,
}

impl WorkQueue {
    pub fn new(kind: QueueKind, policy: QueuePolicy, repo: Arc<dyn QueueRepository>) -> Self {
        Self {
            kind,
            policy,
            repo,
            notify: Arc::new(Notify::new()),
            watchers: DashMap::new(),
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub fn repository(&self) -> Arc<dyn QueueRepository> {
        self.repo.clone()
    }

    /// Enqueue a work unit, collapsing duplicates of the same dedup key.
    ///
    /// If an unresolved entry already holds the key, the existing entry is
    /// returned with outcome `Exists` and the queue length is unchanged.
    pub async fn enqueue(
        &self,
        payload: &WorkPayload,
        priority: i64,
        job_id: Option<String>,
    ) -> Result<EnqueueResult> {
        debug_assert_eq!(payload.kind(), self.kind);

        let dedup_key = payload.dedup_key();

        if let Some(existing) = self.repo.find_unresolved_by_key(self.kind, &dedup_key).await? {
            debug!(
                queue = %self.kind,
                entry_id = %existing.id,
                dedup_key = %dedup_key,
                "Duplicate enqueue collapsed onto existing entry"
            );
            self.ensure_watcher(&existing.id, existing.entry_status().unwrap_or(EntryStatus::Queued));
            return Ok(EnqueueResult {
                entry_id: existing.id,
                outcome: EnqueueOutcome::Exists,
            });
        }

        let entry = QueueEntryDbModel::new(
            self.kind,
            &dedup_key,
            serde_json::to_string(payload)?,
            priority,
            job_id,
        );
        let entry_id = entry.id.clone();

        match self.repo.create_entry(&entry).await {
            Ok(()) => {}
            Err(Error::DatabaseSqlx(e)) if is_unique_violation(&e) => {
                // Lost an insert race for the dedup key; return the winner.
                if let Some(existing) =
                    self.repo.find_unresolved_by_key(self.kind, &dedup_key).await?
                {
                    self.ensure_watcher(
                        &existing.id,
                        existing.entry_status().unwrap_or(EntryStatus::Queued),
                    );
                    return Ok(EnqueueResult {
                        entry_id: existing.id,
                        outcome: EnqueueOutcome::Exists,
                    });
                }
                return Err(Error::DatabaseSqlx(e));
            }
            Err(e) => return Err(e),
        }

        self.ensure_watcher(&entry_id, EntryStatus::Queued);
        info!(queue = %self.kind, entry_id = %entry_id, priority, "Enqueued work unit");
        self.notify.notify_one();

        Ok(EnqueueResult {
            entry_id,
            outcome: EnqueueOutcome::Queued,
        })
    }

    /// Claim the next eligible entry for a worker.
    pub async fn claim_next(&self) -> Result<Option<QueueEntryDbModel>> {
        let Some(entry) = self.repo.claim_next_queued(self.kind).await? else {
            return Ok(None);
        };
        self.signal(&entry.id, EntryStatus::Processing);
        debug!(
            queue = %self.kind,
            entry_id = %entry.id,
            attempt = entry.attempts,
            "Claimed queue entry"
        );
        Ok(Some(entry))
    }

    /// Mark a claimed entry completed and publish its result.
    pub async fn complete(&self, entry_id: &str, output: &WorkOutput) -> Result<()> {
        let result_json = serde_json::to_string(output)?;
        self.repo.mark_completed(entry_id, &result_json).await?;
        info!(queue = %self.kind, entry_id = %entry_id, "Queue entry completed");
        self.signal(entry_id, EntryStatus::Completed);
        Ok(())
    }

    /// Record a failed attempt: reschedule with backoff, or fail the entry
    /// once the attempt budget is exhausted. Returns the resulting status.
    pub async fn fail_attempt(
        &self,
        entry: &QueueEntryDbModel,
        error: &Error,
    ) -> Result<EntryStatus> {
        let message = error.to_string();

        if entry.attempts >= self.policy.max_attempts as i64 {
            self.repo.mark_failed(&entry.id, &message).await?;
            warn!(
                queue = %self.kind,
                entry_id = %entry.id,
                attempts = entry.attempts,
                error = %message,
                "Queue entry failed after exhausting attempts"
            );
            self.signal(&entry.id, EntryStatus::Failed);
            return Ok(EntryStatus::Failed);
        }

        let delay = backoff_delay_with_jitter(
            self.policy.base_delay_ms,
            entry.attempts as u32,
            self.policy.max_delay_ms,
        );
        let next_attempt_at = (chrono::Utc::now()
            + chrono::Duration::milliseconds(delay.as_millis() as i64))
        .to_rfc3339();

        self.repo
            .schedule_retry(&entry.id, &next_attempt_at, &message)
            .await?;
        warn!(
            queue = %self.kind,
            entry_id = %entry.id,
            attempt = entry.attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = %message,
            "Queue entry attempt failed, retry scheduled"
        );
        self.signal(&entry.id, EntryStatus::Queued);
        Ok(EntryStatus::Queued)
    }

    /// Drop a claimed entry whose owning job was cancelled.
    pub async fn cancel_entry(&self, entry_id: &str) -> Result<()> {
        self.repo.mark_cancelled(entry_id).await?;
        info!(queue = %self.kind, entry_id = %entry_id, "Queue entry cancelled");
        self.signal(entry_id, EntryStatus::Cancelled);
        Ok(())
    }

    /// Subscribe to an entry's status changes.
    ///
    /// Works for entries enqueued by this process and for entries recovered
    /// from the store after a restart.
    pub async fn subscribe(&self, entry_id: &str) -> Result<watch::Receiver<EntryStatus>> {
        if let Some(sender) = self.watchers.get(entry_id) {
            return Ok(sender.subscribe());
        }

        // No in-process watcher (e.g. entry recovered after restart): seed a
        // channel from the stored status.
        let entry = self.repo.get_entry(entry_id).await?;
        let status = entry.entry_status().unwrap_or(EntryStatus::Queued);
        if status.is_terminal() {
            // Already settled; a detached receiver primed with the terminal
            // status is enough.
            return Ok(watch::channel(status).1);
        }
        Ok(self.ensure_watcher(entry_id, status).subscribe())
    }

    /// Wait until an entry reaches a terminal status.
    ///
    /// Returns `None` when the cancellation token fires first; the entry
    /// itself keeps running (cooperative cancellation happens in the worker).
    pub async fn wait_terminal(
        &self,
        entry_id: &str,
        token: &CancellationToken,
    ) -> Result<Option<EntryStatus>> {
        let mut rx = self.subscribe(entry_id).await?;
        loop {
            let status = *rx.borrow_and_update();
            if status.is_terminal() {
                return Ok(Some(status));
            }
            tokio::select! {
                _ = token.cancelled() => return Ok(None),
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Watcher dropped without a terminal signal; fall back
                        // to the store.
                        let entry = self.repo.get_entry(entry_id).await?;
                        let status = entry.entry_status().unwrap_or(EntryStatus::Queued);
                        if status.is_terminal() {
                            return Ok(Some(status));
                        }
                        rx = self.subscribe(entry_id).await?;
                    }
                }
            }
        }
    }

    /// Fetch the published result of a completed entry.
    pub async fn get_result(&self, entry_id: &str) -> Result<Option<WorkOutput>> {
        let entry = self.repo.get_entry(entry_id).await?;
        match entry.result {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Last recorded error of an entry, if any.
    pub async fn get_last_error(&self, entry_id: &str) -> Result<Option<String>> {
        Ok(self.repo.get_entry(entry_id).await?.last_error)
    }

    /// Evict terminal entries beyond the configured retention counts.
    pub async fn enforce_retention(&self) -> Result<u64> {
        self.repo
            .enforce_retention(
                self.kind,
                self.policy.remove_on_complete,
                self.policy.remove_on_fail,
            )
            .await
    }

    fn ensure_watcher(
        &self,
        entry_id: &str,
        status: EntryStatus,
    ) -> watch::Sender<EntryStatus> {
        self.watchers
            .entry(entry_id.to_string())
            .or_insert_with(|| watch::channel(status).0)
            .clone()
    }

    fn signal(&self, entry_id: &str, status: EntryStatus) {
        if let Some(sender) = self.watchers.get(entry_id) {
            let _ = sender.send(status);
        }
        if status.is_terminal() {
            self.watchers.remove(entry_id);
        }
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
