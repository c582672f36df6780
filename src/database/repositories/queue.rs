//! Queue entry repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{EntryStatus, QueueEntryDbModel, QueueKind};
use crate::{Error, Result};

/// Count of entries in one status.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

/// Queue entry repository trait.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn create_entry(&self, entry: &QueueEntryDbModel) -> Result<()>;
    async fn get_entry(&self, id: &str) -> Result<QueueEntryDbModel>;

    /// Find the unresolved entry holding a dedup key, if any.
    async fn find_unresolved_by_key(
        &self,
        kind: QueueKind,
        dedup_key: &str,
    ) -> Result<Option<QueueEntryDbModel>>;

    /// Atomically claim the next eligible entry for a queue.
    ///
    /// Eligibility: status QUEUED and next_attempt_at in the past. Dispatch
    /// order is priority ascending, then FIFO by creation time. The claim
    /// increments the attempt count and records the attempt start.
    async fn claim_next_queued(&self, kind: QueueKind) -> Result<Option<QueueEntryDbModel>>;

    async fn mark_completed(&self, id: &str, result_json: &str) -> Result<()>;
    async fn mark_failed(&self, id: &str, error: &str) -> Result<()>;
    async fn mark_cancelled(&self, id: &str) -> Result<()>;

    /// Return a claimed entry to the queue for a later attempt.
    async fn schedule_retry(&self, id: &str, next_attempt_at: &str, error: &str) -> Result<()>;

    /// Requeue entries left PROCESSING by a previous process (crash recovery).
    async fn requeue_interrupted(&self) -> Result<u64>;

    async fn count_by_status(&self, kind: Option<QueueKind>) -> Result<Vec<StatusCount>>;

    async fn list_entries(
        &self,
        status: Option<EntryStatus>,
        limit: u32,
    ) -> Result<Vec<QueueEntryDbModel>>;

    /// Terminal entries, most recently finished first.
    async fn list_history(
        &self,
        status: Option<EntryStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<QueueEntryDbModel>>;

    /// Result blobs of completed entries for one queue kind.
    async fn list_completed_results(&self, kind: QueueKind) -> Result<Vec<String>>;

    /// Evict terminal entries beyond the per-status retention counts.
    async fn enforce_retention(
        &self,
        kind: QueueKind,
        remove_on_complete: u32,
        remove_on_fail: u32,
    ) -> Result<u64>;
}

/// SQLx implementation of QueueRepository.
pub struct SqlxQueueRepository {
    pool: SqlitePool,
}

impl SqlxQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueRepository for SqlxQueueRepository {
    async fn create_entry(&self, entry: &QueueEntryDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queue_entries (
                id, kind, dedup_key, payload, result, priority, status, attempts,
                last_error, job_id, next_attempt_at, created_at, started_at,
                completed_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.kind)
        .bind(&entry.dedup_key)
        .bind(&entry.payload)
        .bind(&entry.result)
        .bind(entry.priority)
        .bind(&entry.status)
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .bind(&entry.job_id)
        .bind(&entry.next_attempt_at)
        .bind(&entry.created_at)
        .bind(&entry.started_at)
        .bind(&entry.completed_at)
        .bind(&entry.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_entry(&self, id: &str) -> Result<QueueEntryDbModel> {
        sqlx::query_as::<_, QueueEntryDbModel>("SELECT * FROM queue_entries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("QueueEntry", id))
    }

    async fn find_unresolved_by_key(
        &self,
        kind: QueueKind,
        dedup_key: &str,
    ) -> Result<Option<QueueEntryDbModel>> {
        let entry = sqlx::query_as::<_, QueueEntryDbModel>(
            r#"
            SELECT * FROM queue_entries
            WHERE kind = ? AND dedup_key = ? AND status IN ('QUEUED', 'PROCESSING')
            LIMIT 1
            "#,
        )
        .bind(kind.as_str())
        .bind(dedup_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn claim_next_queued(&self, kind: QueueKind) -> Result<Option<QueueEntryDbModel>> {
        let now = chrono::Utc::now().to_rfc3339();
        let entry = sqlx::query_as::<_, QueueEntryDbModel>(
            r#"
            UPDATE queue_entries
            SET status = 'PROCESSING', attempts = attempts + 1,
                started_at = ?2, updated_at = ?2
            WHERE id = (
                SELECT id FROM queue_entries
                WHERE kind = ?1 AND status = 'QUEUED' AND next_attempt_at <= ?2
                ORDER BY priority ASC, created_at ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(kind.as_str())
        .bind(&now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn mark_completed(&self, id: &str, result_json: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE queue_entries
            SET status = 'COMPLETED', result = ?1, completed_at = ?2, updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(result_json)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE queue_entries
            SET status = 'FAILED', last_error = ?1, completed_at = ?2, updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(error)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_cancelled(&self, id: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE queue_entries
            SET status = 'CANCELLED', completed_at = ?1, updated_at = ?1
            WHERE id = ?2
            "#,
        )
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn schedule_retry(&self, id: &str, next_attempt_at: &str, error: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE queue_entries
            SET status = 'QUEUED', next_attempt_at = ?, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(next_attempt_at)
        .bind(error)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn requeue_interrupted(&self) -> Result<u64> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE queue_entries
            SET status = 'QUEUED', next_attempt_at = ?1, updated_at = ?1
            WHERE status = 'PROCESSING'
            "#,
        )
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_by_status(&self, kind: Option<QueueKind>) -> Result<Vec<StatusCount>> {
        let counts = match kind {
            Some(kind) => {
                sqlx::query_as::<_, StatusCount>(
                    "SELECT status, COUNT(*) as count FROM queue_entries WHERE kind = ? GROUP BY status",
                )
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, StatusCount>(
                    "SELECT status, COUNT(*) as count FROM queue_entries GROUP BY status",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(counts)
    }

    async fn list_entries(
        &self,
        status: Option<EntryStatus>,
        limit: u32,
    ) -> Result<Vec<QueueEntryDbModel>> {
        let entries = match status {
            Some(status) => {
                sqlx::query_as::<_, QueueEntryDbModel>(
                    r#"
                    SELECT * FROM queue_entries WHERE status = ?
                    ORDER BY priority ASC, created_at ASC LIMIT ?
                    "#,
                )
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, QueueEntryDbModel>(
                    r#"
                    SELECT * FROM queue_entries WHERE status IN ('QUEUED', 'PROCESSING')
                    ORDER BY priority ASC, created_at ASC LIMIT ?
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(entries)
    }

    async fn list_history(
        &self,
        status: Option<EntryStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<QueueEntryDbModel>> {
        let entries = match status {
            Some(status) => {
                sqlx::query_as::<_, QueueEntryDbModel>(
                    r#"
                    SELECT * FROM queue_entries
                    WHERE status = ? AND status IN ('COMPLETED', 'FAILED', 'CANCELLED')
                    ORDER BY completed_at DESC LIMIT ? OFFSET ?
                    "#,
                )
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, QueueEntryDbModel>(
                    r#"
                    SELECT * FROM queue_entries
                    WHERE status IN ('COMPLETED', 'FAILED', 'CANCELLED')
                    ORDER BY completed_at DESC LIMIT ? OFFSET ?
                    "#,
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(entries)
    }

    async fn list_completed_results(&self, kind: QueueKind) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT result FROM queue_entries
            WHERE kind = ? AND status = 'COMPLETED' AND result IS NOT NULL
            "#,
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(result,)| result).collect())
    }

    async fn enforce_retention(
        &self,
        kind: QueueKind,
        remove_on_complete: u32,
        remove_on_fail: u32,
    ) -> Result<u64> {
        let mut removed = 0u64;
        for (status, keep) in [
            (EntryStatus::Completed, remove_on_complete),
            (EntryStatus::Failed, remove_on_fail),
            (EntryStatus::Cancelled, remove_on_fail),
        ] {
            let result = sqlx::query(
                r#"
                DELETE FROM queue_entries
                WHERE kind = ?1 AND status = ?2 AND id NOT IN (
                    SELECT id FROM queue_entries
                    WHERE kind = ?1 AND status = ?2
                    ORDER BY updated_at DESC
                    LIMIT ?3
                )
                "#,
            )
            .bind(kind.as_str())
            .bind(status.as_str())
            .bind(keep)
            .execute(&self.pool)
            .await?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }
}
