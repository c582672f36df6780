//! Health check route.

use axum::{Json, Router, extract::State, routing::get};
use std::collections::HashMap;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::HealthResponse;
use crate::api::server::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

/// Service health: database reachability, queue depths, audio storage stats.
async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let database = sqlx::query("SELECT 1")
        .execute(&state.db_pool)
        .await
        .is_ok();

    let mut queue_depths: HashMap<String, i64> = HashMap::new();
    for queue in &state.queues {
        let counts = state
            .queue_repository
            .count_by_status(Some(queue.kind()))
            .await
            .map_err(ApiError::from)?;
        let queued = counts
            .iter()
            .find(|c| c.status == "QUEUED")
            .map(|c| c.count)
            .unwrap_or(0);
        queue_depths.insert(queue.kind().as_str().to_ascii_lowercase(), queued);
    }

    let (audio_files, audio_bytes) = audio_storage_stats(&state.audio_dir).await;

    let status = if database { "ok" } else { "degraded" };
    Ok(Json(HealthResponse {
        status: status.to_string(),
        database,
        queue_depths,
        tracked_jobs: state.orchestrator.store().len(),
        audio_files,
        audio_bytes,
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

/// Walk the audio tree (`{audio_dir}/{book_id}/chapter_{n}.mp3`) for totals.
async fn audio_storage_stats(audio_dir: &std::path::Path) -> (u64, u64) {
    let mut files = 0u64;
    let mut bytes = 0u64;

    let Ok(mut books) = tokio::fs::read_dir(audio_dir).await else {
        return (0, 0);
    };
    while let Ok(Some(book)) = books.next_entry().await {
        let Ok(mut chapters) = tokio::fs::read_dir(book.path()).await else {
            continue;
        };
        while let Ok(Some(chapter)) = chapters.next_entry().await {
            if let Ok(meta) = chapter.metadata().await {
                if meta.is_file() {
                    files += 1;
                    bytes += meta.len();
                }
            }
        }
    }

    (files, bytes)
}
