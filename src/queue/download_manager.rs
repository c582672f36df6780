//! Dedup & download manager.
//!
//! Front door for download work: normalizes candidate URLs into dedup keys,
//! collapses duplicate in-flight requests, and exposes aggregate statistics
//! and orphan-file cleanup for the download store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::database::models::QueueKind;
use crate::database::repositories::QueueRepository;
use crate::queue::payload::{WorkOutput, WorkPayload};
use crate::queue::work_queue::{EnqueueResult, WorkQueue};
use crate::{Error, Result};

/// Normalize a URL into a dedup key.
///
/// Lowercases scheme and host, drops the fragment, strips a trailing slash
/// from non-root paths, and keeps the query. The url crate already drops
/// default ports.
pub fn normalize_url(raw: &str) -> Result<String> {
    let mut parsed = Url::parse(raw.trim())
        .map_err(|e| Error::validation(format!("invalid URL '{}': {}", raw, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::validation(format!(
            "unsupported URL scheme '{}'",
            parsed.scheme()
        )));
    }

    parsed.set_fragment(None);

    let mut normalized = parsed.to_string();
    if parsed.path() != "/" && parsed.query().is_none() && normalized.ends_with('/') {
        normalized.pop();
    }

    Ok(normalized)
}

/// Aggregate download statistics for dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadStats {
    pub total: i64,
    pub counts_by_status: HashMap<String, i64>,
}

/// The dedup & download manager.
pub struct DownloadManager {
    queue: Arc<WorkQueue>,
    repo: Arc<dyn QueueRepository>,
    download_dir: PathBuf,
}

impl DownloadManager {
    pub fn new(queue: Arc<WorkQueue>, download_dir: PathBuf) -> Self {
        let repo = queue.repository();
        Self {
            queue,
            repo,
            download_dir,
        }
    }

    /// Enqueue a download, collapsing duplicates of the same normalized URL.
    pub async fn enqueue(
        &self,
        url: &str,
        title: &str,
        author: &str,
        format: Option<String>,
        priority: i64,
        job_id: Option<String>,
    ) -> Result<EnqueueResult> {
        // Reject malformed URLs before creating any queue state.
        normalize_url(url)?;

        let payload = WorkPayload::Download {
            url: url.trim().to_string(),
            title: title.to_string(),
            author: author.to_string(),
            format,
        };
        self.queue.enqueue(&payload, priority, job_id).await
    }

    /// Aggregate counts by status across historical entries.
    pub async fn get_stats(&self) -> Result<DownloadStats> {
        let counts = self.repo.count_by_status(Some(QueueKind::Download)).await?;
        let counts_by_status: HashMap<String, i64> = counts
            .into_iter()
            .map(|c| (c.status.to_ascii_lowercase(), c.count))
            .collect();
        let total = counts_by_status.values().sum();
        Ok(DownloadStats {
            total,
            counts_by_status,
        })
    }

    /// Remove files on disk with no corresponding completed download entry.
    ///
    /// Returns the number of files removed.
    pub async fn cleanup_orphans(&self) -> Result<u64> {
        let mut referenced: Vec<PathBuf> = Vec::new();
        for result_json in self
            .repo
            .list_completed_results(QueueKind::Download)
            .await?
        {
            match serde_json::from_str::<WorkOutput>(&result_json) {
                Ok(WorkOutput::Downloaded { file_path, .. }) => {
                    referenced.push(PathBuf::from(file_path));
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping undecodable download result: {}", e),
            }
        }

        let mut removed = 0u64;
        let mut dir = match tokio::fs::read_dir(&self.download_dir).await {
            Ok(dir) => dir,
            // Nothing downloaded yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(dir_entry) = dir.next_entry().await? {
            let path = dir_entry.path();
            if !dir_entry.file_type().await?.is_file() {
                continue;
            }
            if referenced.iter().any(|r| r == &path) {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    info!("Removed orphan download file: {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove orphan file {}: {}", path.display(), e),
            }
        }

        Ok(removed)
    }
}
