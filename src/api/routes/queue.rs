//! Queue introspection routes.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/api/queue/status` | Per-queue depth, workers, and status counts |
//! | GET | `/api/queue/jobs` | Active queue entries |
//! | GET | `/api/queue/history` | Terminal queue entries |
//! | POST | `/api/queue/cleanup` | Enforce retention and remove orphan files |
//! | GET | `/api/queue/downloads/stats` | Download statistics |

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use std::collections::HashMap;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{
    QueueCleanupResponse, QueueEntriesResponse, QueueEntryView, QueueHistoryParams,
    QueueJobsParams, QueueSnapshot, QueueStatusResponse,
};
use crate::api::server::AppState;
use crate::database::models::EntryStatus;
use crate::queue::DownloadStats;

/// Create the queue router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(queue_status))
        .route("/jobs", get(queue_jobs))
        .route("/history", get(queue_history))
        .route("/cleanup", post(queue_cleanup))
        .route("/downloads/stats", get(download_stats))
}

fn parse_status(raw: &Option<String>) -> ApiResult<Option<EntryStatus>> {
    match raw {
        None => Ok(None),
        Some(raw) => EntryStatus::parse(&raw.to_ascii_uppercase())
            .map(Some)
            .ok_or_else(|| ApiError::bad_request(format!("unknown status '{}'", raw))),
    }
}

/// Per-queue depth, worker counts, and historical status counts.
async fn queue_status(State(state): State<AppState>) -> ApiResult<Json<QueueStatusResponse>> {
    let mut queues = Vec::with_capacity(state.queues.len());

    for queue in &state.queues {
        let counts = state
            .queue_repository
            .count_by_status(Some(queue.kind()))
            .await
            .map_err(ApiError::from)?;

        let mut counts_by_status: HashMap<String, i64> = HashMap::new();
        for count in counts {
            counts_by_status.insert(count.status.to_ascii_lowercase(), count.count);
        }
        let queued = counts_by_status.get("queued").copied().unwrap_or(0);
        let processing = counts_by_status.get("processing").copied().unwrap_or(0);

        queues.push(QueueSnapshot {
            kind: queue.kind().as_str().to_ascii_lowercase(),
            queued,
            processing,
            workers: queue.policy().concurrency,
            counts_by_status,
        });
    }

    Ok(Json(QueueStatusResponse { queues }))
}

/// Active (queued or processing) entries across all queues.
async fn queue_jobs(
    State(state): State<AppState>,
    Query(params): Query<QueueJobsParams>,
) -> ApiResult<Json<QueueEntriesResponse>> {
    let status = parse_status(&params.status)?;
    let entries = state
        .queue_repository
        .list_entries(status, params.limit.min(100))
        .await
        .map_err(ApiError::from)?;

    Ok(Json(QueueEntriesResponse {
        entries: entries.into_iter().map(QueueEntryView::from).collect(),
    }))
}

/// Terminal entries, most recently finished first.
async fn queue_history(
    State(state): State<AppState>,
    Query(params): Query<QueueHistoryParams>,
) -> ApiResult<Json<QueueEntriesResponse>> {
    let status = parse_status(&params.status)?;
    let entries = state
        .queue_repository
        .list_history(status, params.limit.min(100), params.offset)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(QueueEntriesResponse {
        entries: entries.into_iter().map(QueueEntryView::from).collect(),
    }))
}

/// Evict terminal entries beyond retention and delete orphan download files.
async fn queue_cleanup(State(state): State<AppState>) -> ApiResult<Json<QueueCleanupResponse>> {
    let mut removed_entries = 0u64;
    for queue in &state.queues {
        removed_entries += queue.enforce_retention().await.map_err(ApiError::from)?;
    }

    let removed_files = state
        .download_manager
        .cleanup_orphans()
        .await
        .map_err(ApiError::from)?;

    Ok(Json(QueueCleanupResponse {
        removed_entries,
        removed_files,
    }))
}

/// Aggregate download statistics.
async fn download_stats(State(state): State<AppState>) -> ApiResult<Json<DownloadStats>> {
    let stats = state
        .download_manager
        .get_stats()
        .await
        .map_err(ApiError::from)?;
    Ok(Json(stats))
}
