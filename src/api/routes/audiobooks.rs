//! Audiobook job routes.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/api/audiobooks` | Create a search-driven conversion job |
//! | POST | `/api/audiobooks/from-link` | Create a job from a direct link |
//! | POST | `/api/audiobooks/from-upload` | Create a job from an uploaded file |
//! | GET | `/api/audiobooks/status/{id}` | Full job snapshot |
//! | GET | `/api/audiobooks/jobs` | Most recent jobs |
//! | DELETE | `/api/audiobooks/{id}` | Cancel a job |

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{delete, get, post},
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{
    CancelResponse, CreateAudiobookRequest, CreateAudiobookResponse, CreateFromLinkRequest,
    CreateFromLinkResponse, CreateFromUploadRequest, ListJobsParams, ListJobsResponse,
    tracking_url,
};
use crate::api::server::AppState;
use crate::pipeline::{
    CreateAudiobookParams, CreateFromLinkParams, CreateFromUploadParams, JobOptions, PipelineJob,
};

/// Create the audiobooks router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_audiobook))
        .route("/from-link", post(create_from_link))
        .route("/from-upload", post(create_from_upload))
        .route("/status/{id}", get(get_status))
        .route("/jobs", get(list_jobs))
        .route("/{id}", delete(cancel_job))
}

fn options_from(
    summarize: bool,
    summary_style: String,
    voice: Option<String>,
    speed: Option<f32>,
) -> JobOptions {
    JobOptions {
        summarize,
        summary_style,
        voice,
        speed,
    }
}

/// Create a search-driven audiobook job.
///
/// Validation errors (empty query, `max_books` < 1) are rejected
/// synchronously; no job is created.
async fn create_audiobook(
    State(state): State<AppState>,
    Json(payload): Json<CreateAudiobookRequest>,
) -> ApiResult<Json<CreateAudiobookResponse>> {
    let created = state
        .orchestrator
        .create_audiobook(CreateAudiobookParams {
            search_query: payload.search_query,
            formats: payload.formats,
            max_books: payload.max_books,
            options: options_from(
                payload.summarize,
                payload.summary_style,
                payload.voice,
                payload.speed,
            ),
        })
        .map_err(ApiError::from)?;

    Ok(Json(CreateAudiobookResponse {
        tracking_url: tracking_url(&created.job_id),
        estimated_time_secs: created.estimated_secs,
        job_id: created.job_id,
    }))
}

/// Create a job from a direct link.
///
/// Malformed URLs fail fast with 400 before any background work starts.
async fn create_from_link(
    State(state): State<AppState>,
    Json(payload): Json<CreateFromLinkRequest>,
) -> ApiResult<Json<CreateFromLinkResponse>> {
    let created = state
        .orchestrator
        .create_from_link(CreateFromLinkParams {
            url: payload.url,
            title: payload.title,
            author: payload.author,
            formats: payload.formats,
            options: options_from(
                payload.summarize,
                payload.summary_style,
                payload.voice,
                payload.speed,
            ),
        })
        .map_err(ApiError::from)?;

    Ok(Json(CreateFromLinkResponse {
        tracking_url: tracking_url(&created.job_id),
        job_id: created.job_id,
    }))
}

/// Create a job from an already-uploaded file.
async fn create_from_upload(
    State(state): State<AppState>,
    Json(payload): Json<CreateFromUploadRequest>,
) -> ApiResult<Json<CreateFromLinkResponse>> {
    let created = state
        .orchestrator
        .create_from_upload(CreateFromUploadParams {
            file_path: payload.file_path,
            title: payload.title,
            author: payload.author,
            options: options_from(
                payload.summarize,
                payload.summary_style,
                payload.voice,
                payload.speed,
            ),
        })
        .map_err(ApiError::from)?;

    Ok(Json(CreateFromLinkResponse {
        tracking_url: tracking_url(&created.job_id),
        job_id: created.job_id,
    }))
}

/// Full snapshot of one job: status, progress, steps, books, error.
async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PipelineJob>> {
    state
        .orchestrator
        .get_status(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Job {} not found", id)))
}

/// Most recent jobs, newest first.
async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> ApiResult<Json<ListJobsResponse>> {
    let limit = params.limit.min(100) as usize;
    Ok(Json(ListJobsResponse {
        jobs: state.orchestrator.list_jobs(limit),
    }))
}

/// Cancel a job cooperatively.
async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let cancelled = state.orchestrator.cancel(&id).map_err(ApiError::from)?;
    Ok(Json(CancelResponse {
        job_id: id,
        cancelled,
    }))
}
