//! API request/response models.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::pipeline::PipelineJob;

fn default_max_books() -> u32 {
    1
}

fn default_summary_style() -> String {
    "concise".to_string()
}

/// Request body for creating a search-driven audiobook job.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAudiobookRequest {
    /// Catalog search query.
    pub search_query: String,
    /// Acceptable book formats (e.g. ["epub", "pdf"]).
    #[serde(default)]
    pub formats: Vec<String>,
    /// How many books to convert from the search results.
    #[serde(default = "default_max_books")]
    pub max_books: u32,
    /// Run the best-effort summarization step before synthesis.
    #[serde(default)]
    pub summarize: bool,
    /// Summary style (concise, detailed, bullets).
    #[serde(default = "default_summary_style")]
    pub summary_style: String,
    /// Speaker id override.
    #[serde(default)]
    pub voice: Option<String>,
    /// Speech speed multiplier override.
    #[serde(default)]
    pub speed: Option<f32>,
}

/// Response for a created search job.
#[derive(Debug, Clone, Serialize)]
pub struct CreateAudiobookResponse {
    pub job_id: String,
    /// Status polling URL for this job.
    pub tracking_url: String,
    /// Rough conversion estimate in seconds.
    pub estimated_time_secs: u64,
}

/// Request body for creating a job from a direct link.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFromLinkRequest {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub summarize: bool,
    #[serde(default = "default_summary_style")]
    pub summary_style: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub speed: Option<f32>,
}

/// Response for a created link job.
#[derive(Debug, Clone, Serialize)]
pub struct CreateFromLinkResponse {
    pub job_id: String,
    pub tracking_url: String,
}

/// Request body for creating a job from an uploaded file.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFromUploadRequest {
    /// Server-local path of the uploaded file.
    pub file_path: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub summarize: bool,
    #[serde(default = "default_summary_style")]
    pub summary_style: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub speed: Option<f32>,
}

/// Query parameters for the job listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ListJobsParams {
    /// Number of jobs to return (default 20, max 100).
    #[serde(default = "default_list_limit")]
    pub limit: u32,
}

fn default_list_limit() -> u32 {
    20
}

/// Response for the job listing.
#[derive(Debug, Clone, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<PipelineJob>,
}

/// Response for a cancel call.
#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    /// False when the job had already reached a terminal status.
    pub cancelled: bool,
}

/// Per-queue state for queue introspection.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub kind: String,
    /// Entries waiting to be claimed.
    pub queued: i64,
    /// Entries currently claimed by workers.
    pub processing: i64,
    /// Configured worker-pool size.
    pub workers: usize,
    /// Counts by status across historical entries.
    pub counts_by_status: HashMap<String, i64>,
}

/// Response for `GET /api/queue/status`.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatusResponse {
    pub queues: Vec<QueueSnapshot>,
}

/// Query parameters for active queue entries.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueJobsParams {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_list_limit")]
    pub limit: u32,
}

/// Query parameters for queue history.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueHistoryParams {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_list_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

/// One queue entry in API responses.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntryView {
    pub id: String,
    pub kind: String,
    pub status: String,
    pub priority: i64,
    pub attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Wall-clock processing duration in seconds, when finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_secs: Option<f64>,
}

impl From<crate::database::models::QueueEntryDbModel> for QueueEntryView {
    fn from(entry: crate::database::models::QueueEntryDbModel) -> Self {
        let processing_secs = entry.processing_secs();
        Self {
            id: entry.id,
            kind: entry.kind,
            status: entry.status,
            priority: entry.priority,
            attempts: entry.attempts,
            job_id: entry.job_id,
            last_error: entry.last_error,
            created_at: entry.created_at,
            completed_at: entry.completed_at,
            processing_secs,
        }
    }
}

/// Response for queue entry listings.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEntriesResponse {
    pub entries: Vec<QueueEntryView>,
}

/// Response for `POST /api/queue/cleanup`.
#[derive(Debug, Clone, Serialize)]
pub struct QueueCleanupResponse {
    /// Terminal entries evicted beyond retention limits.
    pub removed_entries: u64,
    /// Orphan files removed from the download directory.
    pub removed_files: u64,
}

/// Response for `GET /api/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: bool,
    /// Queued entry count per queue kind.
    pub queue_depths: HashMap<String, i64>,
    /// Jobs currently tracked in the progress store.
    pub tracked_jobs: usize,
    /// Generated audio files on disk.
    pub audio_files: u64,
    /// Total bytes of generated audio.
    pub audio_bytes: u64,
    pub uptime_secs: u64,
}

/// Build the status polling URL for a job.
pub fn tracking_url(job_id: &str) -> String {
    format!("/api/audiobooks/status/{}", job_id)
}
