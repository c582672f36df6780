//! Integration tests for the bookforge database layer.
//!
//! These tests run against a real SQLite database (file-backed in a temp
//! directory, so pooled connections share state) to verify the queue
//! repository against the actual schema.

use bookforge::database::models::{EntryStatus, QueueEntryDbModel, QueueKind};
use bookforge::database::repositories::{QueueRepository, SqlxQueueRepository};
use bookforge::database::{DbPool, init_pool, run_migrations};
use tempfile::TempDir;

/// Helper to create a test database pool with migrations applied.
async fn setup_test_db(dir: &TempDir) -> DbPool {
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("test.db").display());
    let pool = init_pool(&url).await.expect("Failed to create test pool");
    run_migrations(&pool).await.expect("Failed to run migrations");
    pool
}

fn entry(kind: QueueKind, dedup_key: &str, priority: i64) -> QueueEntryDbModel {
    QueueEntryDbModel::new(kind, dedup_key, "{\"type\":\"test\"}", priority, None)
}

mod schema_tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_create_queue_table() {
        let dir = TempDir::new().unwrap();
        let pool = setup_test_db(&dir).await;

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .expect("Failed to query tables");

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(table_names.contains(&"queue_entries"), "queue_entries table missing");
    }

    #[tokio::test]
    async fn test_unresolved_dedup_key_is_unique() {
        let dir = TempDir::new().unwrap();
        let pool = setup_test_db(&dir).await;
        let repo = SqlxQueueRepository::new(pool);

        let first = entry(QueueKind::Download, "https://example.org/b1", 0);
        repo.create_entry(&first).await.expect("first insert");

        // Same unresolved key must be rejected by the partial unique index.
        let duplicate = entry(QueueKind::Download, "https://example.org/b1", 0);
        assert!(repo.create_entry(&duplicate).await.is_err());

        // Once the holder resolves, the key becomes available again.
        repo.mark_completed(&first.id, "{}").await.unwrap();
        let fresh = entry(QueueKind::Download, "https://example.org/b1", 0);
        repo.create_entry(&fresh).await.expect("insert after resolve");
    }
}

mod claim_tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_respects_priority_then_fifo() {
        let dir = TempDir::new().unwrap();
        let pool = setup_test_db(&dir).await;
        let repo = SqlxQueueRepository::new(pool);

        let mut ad_hoc = entry(QueueKind::Download, "url-a", 10);
        ad_hoc.created_at = "2026-01-01T00:00:00+00:00".to_string();
        let mut pipeline_late = entry(QueueKind::Download, "url-b", 0);
        pipeline_late.created_at = "2026-01-01T00:00:02+00:00".to_string();
        let mut pipeline_early = entry(QueueKind::Download, "url-c", 0);
        pipeline_early.created_at = "2026-01-01T00:00:01+00:00".to_string();

        repo.create_entry(&ad_hoc).await.unwrap();
        repo.create_entry(&pipeline_late).await.unwrap();
        repo.create_entry(&pipeline_early).await.unwrap();

        // Pipeline priority outranks ad-hoc; FIFO breaks the tie.
        let first = repo.claim_next_queued(QueueKind::Download).await.unwrap().unwrap();
        assert_eq!(first.id, pipeline_early.id);
        let second = repo.claim_next_queued(QueueKind::Download).await.unwrap().unwrap();
        assert_eq!(second.id, pipeline_late.id);
        let third = repo.claim_next_queued(QueueKind::Download).await.unwrap().unwrap();
        assert_eq!(third.id, ad_hoc.id);

        assert!(repo.claim_next_queued(QueueKind::Download).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_increments_attempts_and_marks_processing() {
        let dir = TempDir::new().unwrap();
        let pool = setup_test_db(&dir).await;
        let repo = SqlxQueueRepository::new(pool);

        let queued = entry(QueueKind::Synthesis, "b1:1", 0);
        repo.create_entry(&queued).await.unwrap();

        let claimed = repo.claim_next_queued(QueueKind::Synthesis).await.unwrap().unwrap();
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.entry_status(), Some(EntryStatus::Processing));
        assert!(claimed.started_at.is_some());
    }

    #[tokio::test]
    async fn test_claim_skips_entries_scheduled_for_later() {
        let dir = TempDir::new().unwrap();
        let pool = setup_test_db(&dir).await;
        let repo = SqlxQueueRepository::new(pool);

        let queued = entry(QueueKind::Extraction, "file-1", 0);
        repo.create_entry(&queued).await.unwrap();

        let future = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        repo.schedule_retry(&queued.id, &future, "transient").await.unwrap();

        assert!(repo.claim_next_queued(QueueKind::Extraction).await.unwrap().is_none());

        let past = (chrono::Utc::now() - chrono::Duration::seconds(1)).to_rfc3339();
        repo.schedule_retry(&queued.id, &past, "transient").await.unwrap();
        let claimed = repo.claim_next_queued(QueueKind::Extraction).await.unwrap().unwrap();
        assert_eq!(claimed.id, queued.id);
        assert_eq!(claimed.last_error.as_deref(), Some("transient"));
    }

    #[tokio::test]
    async fn test_claim_is_scoped_to_queue_kind() {
        let dir = TempDir::new().unwrap();
        let pool = setup_test_db(&dir).await;
        let repo = SqlxQueueRepository::new(pool);

        repo.create_entry(&entry(QueueKind::Download, "url-x", 0)).await.unwrap();

        assert!(repo.claim_next_queued(QueueKind::Synthesis).await.unwrap().is_none());
        assert!(repo.claim_next_queued(QueueKind::Download).await.unwrap().is_some());
    }
}

mod recovery_tests {
    use super::*;

    #[tokio::test]
    async fn test_requeue_interrupted_returns_claimed_entries() {
        let dir = TempDir::new().unwrap();
        let pool = setup_test_db(&dir).await;
        let repo = SqlxQueueRepository::new(pool);

        let queued = entry(QueueKind::Download, "url-1", 0);
        repo.create_entry(&queued).await.unwrap();
        repo.claim_next_queued(QueueKind::Download).await.unwrap().unwrap();

        // Simulated restart: the claimed entry must not be lost.
        let requeued = repo.requeue_interrupted().await.unwrap();
        assert_eq!(requeued, 1);

        let claimed = repo.claim_next_queued(QueueKind::Download).await.unwrap().unwrap();
        assert_eq!(claimed.id, queued.id);
        assert_eq!(claimed.attempts, 2);
    }

    #[tokio::test]
    async fn test_requeue_interrupted_ignores_terminal_entries() {
        let dir = TempDir::new().unwrap();
        let pool = setup_test_db(&dir).await;
        let repo = SqlxQueueRepository::new(pool);

        let done = entry(QueueKind::Download, "url-done", 0);
        repo.create_entry(&done).await.unwrap();
        repo.mark_completed(&done.id, "{}").await.unwrap();

        assert_eq!(repo.requeue_interrupted().await.unwrap(), 0);
        let reloaded = repo.get_entry(&done.id).await.unwrap();
        assert_eq!(reloaded.entry_status(), Some(EntryStatus::Completed));
    }
}

mod retention_tests {
    use super::*;

    #[tokio::test]
    async fn test_retention_keeps_most_recent_entries() {
        let dir = TempDir::new().unwrap();
        let pool = setup_test_db(&dir).await;
        let repo = SqlxQueueRepository::new(pool);

        for i in 0..5 {
            let e = entry(QueueKind::Extraction, &format!("file-{}", i), 0);
            repo.create_entry(&e).await.unwrap();
            repo.mark_completed(&e.id, "{}").await.unwrap();
            // Distinct updated_at values for a deterministic eviction order.
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let removed = repo.enforce_retention(QueueKind::Extraction, 2, 2).await.unwrap();
        assert_eq!(removed, 3);

        let remaining = repo
            .list_history(Some(EntryStatus::Completed), 10, 0)
            .await
            .unwrap();
        let remaining: Vec<_> = remaining
            .iter()
            .filter(|e| e.kind == QueueKind::Extraction.as_str())
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|e| e.dedup_key == "file-3" || e.dedup_key == "file-4"));
    }

    #[tokio::test]
    async fn test_count_by_status_aggregates() {
        let dir = TempDir::new().unwrap();
        let pool = setup_test_db(&dir).await;
        let repo = SqlxQueueRepository::new(pool);

        repo.create_entry(&entry(QueueKind::Download, "a", 0)).await.unwrap();
        repo.create_entry(&entry(QueueKind::Download, "b", 0)).await.unwrap();
        let failed = entry(QueueKind::Download, "c", 0);
        repo.create_entry(&failed).await.unwrap();
        repo.mark_failed(&failed.id, "boom").await.unwrap();

        let counts = repo.count_by_status(Some(QueueKind::Download)).await.unwrap();
        let queued = counts.iter().find(|c| c.status == "QUEUED").map(|c| c.count);
        let failed = counts.iter().find(|c| c.status == "FAILED").map(|c| c.count);
        assert_eq!(queued, Some(2));
        assert_eq!(failed, Some(1));
    }
}
