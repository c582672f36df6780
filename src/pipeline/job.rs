//! Pipeline job types and progress accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rough per-book conversion estimate returned from create calls.
pub const ESTIMATED_SECS_PER_BOOK: u64 = 300;

/// How a job was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Search,
    DirectLink,
    Upload,
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job was accepted; its background task has not advanced a step yet.
    Starting,
    /// At least one step is running or waiting on queued work.
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Once terminal, a job never mutates again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Named phases of a job, in fixed pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepId {
    /// Catalog search (search jobs).
    Search,
    /// Link/file analysis (direct-link and upload jobs).
    Analyze,
    Download,
    Parse,
    Summarize,
    Tts,
    Complete,
}

impl StepId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Analyze => "analyze",
            Self::Download => "download",
            Self::Parse => "parse",
            Self::Summarize => "summarize",
            Self::Tts => "tts",
            Self::Complete => "complete",
        }
    }
}

/// Step status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One step of a job with its human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub step: StepId,
    pub status: StepStatus,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl StepState {
    fn pending(step: StepId) -> Self {
        Self {
            step,
            status: StepStatus::Pending,
            message: String::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Terminal status of one book within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    /// Source file fetched; conversion still in progress.
    Downloaded,
    /// All chapters synthesized.
    AudioGenerated,
    Failed,
}

/// Output of one synthesized chapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioChapter {
    pub index: u32,
    pub title: String,
    pub audio_path: String,
    pub duration_secs: f64,
    pub size_bytes: u64,
    /// Whether the audio was produced from summarized text.
    pub from_summary: bool,
}

/// One book within a (possibly multi-book) job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRecord {
    pub title: String,
    pub author: String,
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BookStatus>,
    pub chapters: Vec<AudioChapter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BookRecord {
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            source_url: source_url.into(),
            status: None,
            chapters: Vec::new(),
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            Some(BookStatus::AudioGenerated) | Some(BookStatus::Failed)
        )
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, Some(BookStatus::AudioGenerated))
    }
}

/// The client-visible unit of work: one audiobook-creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineJob {
    pub id: String,
    pub kind: JobKind,
    /// Query string, URL, or file reference depending on kind.
    pub input: String,
    pub status: JobStatus,
    /// 0-100, monotonic non-decreasing while the job is active.
    pub progress: u8,
    /// Steps in fixed pipeline order.
    pub steps: Vec<StepState>,
    pub books: Vec<BookRecord>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineJob {
    /// Create a job in `starting` state with all steps pending.
    pub fn new(kind: JobKind, input: impl Into<String>, summarize: bool) -> Self {
        let mut steps = Vec::with_capacity(6);
        match kind {
            JobKind::Search => steps.push(StepState::pending(StepId::Search)),
            JobKind::DirectLink | JobKind::Upload => {
                steps.push(StepState::pending(StepId::Analyze))
            }
        }
        if kind != JobKind::Upload {
            steps.push(StepState::pending(StepId::Download));
        }
        steps.push(StepState::pending(StepId::Parse));
        if summarize {
            steps.push(StepState::pending(StepId::Summarize));
        }
        steps.push(StepState::pending(StepId::Tts));
        steps.push(StepState::pending(StepId::Complete));

        Self {
            id: new_job_id(),
            kind,
            input: input.into(),
            status: JobStatus::Starting,
            progress: 0,
            steps,
            books: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    pub fn step(&self, id: StepId) -> Option<&StepState> {
        self.steps.iter().find(|s| s.step == id)
    }

    /// Move a step to a new status with a message.
    ///
    /// Steps only ever advance; a terminal step is left untouched.
    pub fn set_step(&mut self, id: StepId, status: StepStatus, message: impl Into<String>) {
        if let Some(step) = self.steps.iter_mut().find(|s| s.step == id) {
            if step.status.is_terminal() {
                return;
            }
            step.status = status;
            step.message = message.into();
            step.updated_at = Utc::now();
        }
    }

    /// Update only the message of a non-terminal step.
    pub fn set_step_message(&mut self, id: StepId, message: impl Into<String>) {
        if let Some(step) = self.steps.iter_mut().find(|s| s.step == id) {
            if !step.status.is_terminal() {
                step.message = message.into();
                step.updated_at = Utc::now();
            }
        }
    }

    /// Raise progress to `value`; progress never decreases while active.
    pub fn advance_progress(&mut self, value: u8) {
        self.progress = self.progress.max(value.min(100));
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark every non-terminal step cancelled and finish the job.
    pub fn cancel(&mut self) {
        for step in &mut self.steps {
            if !step.status.is_terminal() {
                step.status = StepStatus::Cancelled;
                step.message = "Cancelled".to_string();
                step.updated_at = Utc::now();
            }
        }
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}

/// Opaque job id derived from time plus randomness.
fn new_job_id() -> String {
    format!(
        "{:x}-{:08x}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

/// Per-book bookkeeping the job task uses to blend overall progress.
#[derive(Debug, Clone, Default)]
pub struct BookProgress {
    pub downloaded: bool,
    pub parsed: bool,
    pub summarized: bool,
    pub synthesis_started: bool,
    pub chapters_total: u32,
    pub chapters_done: u32,
    pub terminal: bool,
}

/// Blend per-book completion into overall job progress.
///
/// Bands: 0-25 search/analyze, 25-50 download, 50-70 parse, 70-95 synthesis,
/// 100 on the completion step. Parse credit is split: half when extraction
/// finishes, the rest once synthesis has been scheduled for the book.
pub fn blended_progress(books: &[BookProgress]) -> u8 {
    if books.is_empty() {
        return 25;
    }
    let n = books.len() as f64;

    let download_frac = books.iter().filter(|b| b.downloaded).count() as f64 / n;
    let parse_frac = books
        .iter()
        .map(|b| match (b.parsed, b.synthesis_started) {
            (true, true) => 1.0,
            (true, false) => 0.5,
            _ => 0.0,
        })
        .sum::<f64>()
        / n;
    let tts_frac = books
        .iter()
        .map(|b| {
            if b.chapters_total == 0 {
                0.0
            } else {
                b.chapters_done as f64 / b.chapters_total as f64
            }
        })
        .sum::<f64>()
        / n;

    let progress = 25.0 + 25.0 * download_frac + 20.0 * parse_frac + 25.0 * tts_frac;
    progress.floor().min(100.0) as u8
}
