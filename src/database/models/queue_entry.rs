//! Queue entry database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Which durable work queue an entry belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueKind {
    Download,
    Extraction,
    Synthesis,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "DOWNLOAD",
            Self::Extraction => "EXTRACTION",
            Self::Synthesis => "SYNTHESIS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DOWNLOAD" => Some(Self::Download),
            "EXTRACTION" => Some(Self::Extraction),
            "SYNTHESIS" => Some(Self::Synthesis),
            _ => None,
        }
    }

    pub const ALL: [QueueKind; 3] = [Self::Download, Self::Extraction, Self::Synthesis];
}

/// Queue entry status values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    /// Entry is waiting to be claimed by a worker.
    Queued,
    /// Entry is claimed by exactly one worker.
    Processing,
    /// Entry finished successfully.
    Completed,
    /// Entry failed after exhausting attempts.
    Failed,
    /// Entry was skipped because its owning job was cancelled.
    Cancelled,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(Self::Queued),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// An entry counts against its dedup key only while unresolved.
    pub fn is_unresolved(&self) -> bool {
        !self.is_terminal()
    }
}

/// Queue entry database model.
///
/// One unit of work handed to a worker pool. The `payload` and `result`
/// columns hold JSON blobs owned by the queue domain layer.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueueEntryDbModel {
    pub id: String,
    /// Queue kind: DOWNLOAD, EXTRACTION, SYNTHESIS
    pub kind: String,
    /// Normalized identity used to collapse duplicate in-flight work
    pub dedup_key: String,
    /// JSON blob describing the work unit
    pub payload: String,
    /// JSON blob with the worker's output, set on completion
    pub result: Option<String>,
    /// Lower numeric value = higher priority
    pub priority: i64,
    /// Status: QUEUED, PROCESSING, COMPLETED, FAILED, CANCELLED
    pub status: String,
    /// Number of execution attempts started
    pub attempts: i64,
    /// Last error message, if any attempt failed
    pub last_error: Option<String>,
    /// Owning pipeline job id, if pipeline-originated
    pub job_id: Option<String>,
    /// ISO 8601 timestamp before which the entry is not eligible
    pub next_attempt_at: String,
    /// ISO 8601 timestamp when the entry was created
    pub created_at: String,
    /// ISO 8601 timestamp when the latest attempt started
    pub started_at: Option<String>,
    /// ISO 8601 timestamp when the entry reached a terminal status
    pub completed_at: Option<String>,
    /// ISO 8601 timestamp of the last mutation
    pub updated_at: String,
}

impl QueueEntryDbModel {
    pub fn new(
        kind: QueueKind,
        dedup_key: impl Into<String>,
        payload: impl Into<String>,
        priority: i64,
        job_id: Option<String>,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.as_str().to_string(),
            dedup_key: dedup_key.into(),
            payload: payload.into(),
            result: None,
            priority,
            status: EntryStatus::Queued.as_str().to_string(),
            attempts: 0,
            last_error: None,
            job_id,
            next_attempt_at: now.clone(),
            created_at: now.clone(),
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn entry_status(&self) -> Option<EntryStatus> {
        EntryStatus::parse(&self.status)
    }

    pub fn queue_kind(&self) -> Option<QueueKind> {
        QueueKind::parse(&self.kind)
    }

    /// Wall-clock processing duration, when both endpoints are recorded.
    pub fn processing_secs(&self) -> Option<f64> {
        let started = chrono::DateTime::parse_from_rfc3339(self.started_at.as_deref()?).ok()?;
        let completed = chrono::DateTime::parse_from_rfc3339(self.completed_at.as_deref()?).ok()?;
        let millis = (completed - started).num_milliseconds();
        Some(millis as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            EntryStatus::Queued,
            EntryStatus::Processing,
            EntryStatus::Completed,
            EntryStatus::Failed,
            EntryStatus::Cancelled,
        ] {
            assert_eq!(EntryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EntryStatus::parse("BOGUS"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!EntryStatus::Queued.is_terminal());
        assert!(!EntryStatus::Processing.is_terminal());
        assert!(EntryStatus::Completed.is_terminal());
        assert!(EntryStatus::Failed.is_terminal());
        assert!(EntryStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_new_entry_is_queued() {
        let entry = QueueEntryDbModel::new(QueueKind::Download, "key", "{}", 0, None);
        assert_eq!(entry.entry_status(), Some(EntryStatus::Queued));
        assert_eq!(entry.attempts, 0);
        assert!(entry.result.is_none());
    }
}
