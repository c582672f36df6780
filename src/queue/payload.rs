//! Work unit payloads and outputs.

use serde::{Deserialize, Serialize};

use crate::database::models::QueueKind;
use crate::providers::ExtractedChapter;
use crate::queue::normalize_url;

/// Priority for pipeline-originated work. Lower value = dispatched first.
pub const PRIORITY_PIPELINE: i64 = 0;

/// Priority for ad-hoc requests submitted outside a pipeline job.
pub const PRIORITY_AD_HOC: i64 = 10;

/// One unit of work submitted to a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkPayload {
    /// Fetch a remote book file to local storage.
    Download {
        url: String,
        title: String,
        author: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    /// Extract chapter text from a downloaded file.
    Extract { file_path: String, book_id: String },
    /// Synthesize one chapter of text to audio.
    Synthesize {
        text: String,
        voice: String,
        speed: f32,
        book_id: String,
        chapter_index: u32,
        chapter_title: String,
        /// Whether the text was produced by the summarization service.
        from_summary: bool,
    },
}

impl WorkPayload {
    /// The queue this payload belongs to.
    pub fn kind(&self) -> QueueKind {
        match self {
            Self::Download { .. } => QueueKind::Download,
            Self::Extract { .. } => QueueKind::Extraction,
            Self::Synthesize { .. } => QueueKind::Synthesis,
        }
    }

    /// Logical identity used to collapse duplicate in-flight work.
    ///
    /// Downloads dedup on the normalized URL, extraction on the source file,
    /// synthesis on the chapter id.
    pub fn dedup_key(&self) -> String {
        match self {
            Self::Download { url, .. } => {
                normalize_url(url).unwrap_or_else(|_| url.trim().to_string())
            }
            Self::Extract { file_path, .. } => file_path.clone(),
            Self::Synthesize {
                book_id,
                chapter_index,
                ..
            } => format!("{}:{}", book_id, chapter_index),
        }
    }
}

/// Output of a successfully executed work unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkOutput {
    Downloaded {
        file_path: String,
        size_bytes: u64,
    },
    Extracted {
        chapters: Vec<ExtractedChapter>,
    },
    Synthesized {
        audio_path: String,
        duration_secs: f64,
        size_bytes: u64,
    },
}
