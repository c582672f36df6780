//! Pipeline orchestrator.
//!
//! Owns the lifecycle of every Pipeline Job: one background task per active
//! job advances it through its steps, fans multi-book requests out into
//! independent per-book sub-pipelines, aggregates their terminal states, and
//! finalizes the job. The API layer only ever reads snapshots from the
//! [`JobStore`]; all mutation goes through the owning task (the cancel path
//! being the one sanctioned exception).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::config::ProviderConfig;
use crate::pipeline::job::{
    AudioChapter, BookProgress, BookRecord, BookStatus, ESTIMATED_SECS_PER_BOOK, JobKind,
    JobStatus, PipelineJob, StepId, StepStatus, blended_progress,
};
use crate::pipeline::store::JobStore;
use crate::providers::{ExtractedChapter, Providers, preferred_download_link};
use crate::queue::{
    DownloadManager, EntryStatus, PRIORITY_PIPELINE, WorkOutput, WorkPayload, WorkQueue,
    normalize_url,
};
use crate::{Error, Result};

/// Step-to-step settling delay. Avoids hammering the store between phases
/// without turning waits into busy-polls; cancellation is observed here.
const STEP_SETTLE: Duration = Duration::from_millis(250);

/// Options shared by all create operations.
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Run the best-effort summarization step before synthesis.
    pub summarize: bool,
    /// Summary style forwarded to the summarization service.
    pub summary_style: String,
    /// Speaker id override; falls back to the configured default.
    pub voice: Option<String>,
    /// Speech speed override.
    pub speed: Option<f32>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            summarize: false,
            summary_style: "concise".to_string(),
            voice: None,
            speed: None,
        }
    }
}

/// Parameters for `create_audiobook`.
#[derive(Debug, Clone)]
pub struct CreateAudiobookParams {
    pub search_query: String,
    pub formats: Vec<String>,
    pub max_books: u32,
    pub options: JobOptions,
}

/// Parameters for `create_from_link`.
#[derive(Debug, Clone)]
pub struct CreateFromLinkParams {
    pub url: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub formats: Vec<String>,
    pub options: JobOptions,
}

/// Parameters for `create_from_upload`.
#[derive(Debug, Clone)]
pub struct CreateFromUploadParams {
    pub file_path: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub options: JobOptions,
}

/// Accepted job handle returned from create operations.
#[derive(Debug, Clone)]
pub struct CreatedJob {
    pub job_id: String,
    pub estimated_secs: u64,
}

/// Everything a book sub-pipeline needs to start.
#[derive(Debug, Clone)]
struct BookSeed {
    title: String,
    author: String,
    source_url: String,
    format: Option<String>,
    /// Set for upload jobs: the file is already local, skip download.
    file_path: Option<String>,
}

/// Progress events flowing from book sub-pipelines to the owning job task.
enum BookEvent {
    DownloadStarted { index: usize },
    Downloaded { index: usize },
    ParseStarted { index: usize },
    Parsed { index: usize, chapter_count: u32 },
    SummarizeStarted { index: usize },
    Summarized { index: usize, summarized: u32, total: u32 },
    SynthesisStarted { index: usize, total_chapters: u32 },
    ChapterSynthesized { index: usize, chapter: AudioChapter },
    BookSucceeded { index: usize },
    BookFailed { index: usize, step: StepId, error: String },
}

/// Job input per creation kind, carried into the background task.
enum JobInput {
    Search {
        query: String,
        params: CreateAudiobookParams,
    },
    Link {
        params: CreateFromLinkParams,
    },
    Upload {
        params: CreateFromUploadParams,
    },
}

impl JobInput {
    fn options(&self) -> &JobOptions {
        match self {
            Self::Search { params, .. } => &params.options,
            Self::Link { params } => &params.options,
            Self::Upload { params } => &params.options,
        }
    }
}

/// The pipeline orchestrator service. Cheap to clone; all state lives behind
/// one shared inner.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    store: Arc<JobStore>,
    download_manager: Arc<DownloadManager>,
    download_queue: Arc<WorkQueue>,
    extraction_queue: Arc<WorkQueue>,
    synthesis_queue: Arc<WorkQueue>,
    providers: Providers,
    config: ProviderConfig,
    /// Per-job cancellation tokens, children of the root token.
    job_tokens: DashMap<String, CancellationToken>,
    root_token: CancellationToken,
}

impl PipelineOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<JobStore>,
        download_manager: Arc<DownloadManager>,
        download_queue: Arc<WorkQueue>,
        extraction_queue: Arc<WorkQueue>,
        synthesis_queue: Arc<WorkQueue>,
        providers: Providers,
        config: ProviderConfig,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                store,
                download_manager,
                download_queue,
                extraction_queue,
                synthesis_queue,
                providers,
                config,
                job_tokens: DashMap::new(),
                root_token: CancellationToken::new(),
            }),
        }
    }

    pub fn store(&self) -> Arc<JobStore> {
        self.inner.store.clone()
    }

    /// Create a search-driven audiobook job. Returns immediately; the job
    /// advances in its own background task.
    pub fn create_audiobook(&self, params: CreateAudiobookParams) -> Result<CreatedJob> {
        let query = params.search_query.trim().to_string();
        if query.is_empty() {
            return Err(Error::validation("search query must not be empty"));
        }
        if params.max_books < 1 {
            return Err(Error::validation("max_books must be at least 1"));
        }

        let job = PipelineJob::new(JobKind::Search, query.clone(), params.options.summarize);
        let job_id = job.id.clone();
        let estimated_secs = params.max_books as u64 * ESTIMATED_SECS_PER_BOOK;
        self.inner.store.insert(job);

        info!(job_id = %job_id, query = %query, max_books = params.max_books, "Created audiobook job");
        self.spawn_job_task(job_id.clone(), JobInput::Search { query, params });

        Ok(CreatedJob {
            job_id,
            estimated_secs,
        })
    }

    /// Create a job from a direct link. Malformed URLs are rejected
    /// synchronously, before any background work starts.
    pub fn create_from_link(&self, params: CreateFromLinkParams) -> Result<CreatedJob> {
        normalize_url(&params.url)?;

        let job = PipelineJob::new(
            JobKind::DirectLink,
            params.url.clone(),
            params.options.summarize,
        );
        let job_id = job.id.clone();
        self.inner.store.insert(job);

        info!(job_id = %job_id, url = %params.url, "Created direct-link job");
        self.spawn_job_task(job_id.clone(), JobInput::Link { params });

        Ok(CreatedJob {
            job_id,
            estimated_secs: ESTIMATED_SECS_PER_BOOK,
        })
    }

    /// Create a job from an already-uploaded file; the download step is
    /// skipped entirely.
    pub fn create_from_upload(&self, params: CreateFromUploadParams) -> Result<CreatedJob> {
        if params.file_path.trim().is_empty() {
            return Err(Error::validation("file_path must not be empty"));
        }

        let job = PipelineJob::new(
            JobKind::Upload,
            params.file_path.clone(),
            params.options.summarize,
        );
        let job_id = job.id.clone();
        self.inner.store.insert(job);

        info!(job_id = %job_id, file = %params.file_path, "Created upload job");
        self.spawn_job_task(job_id.clone(), JobInput::Upload { params });

        Ok(CreatedJob {
            job_id,
            estimated_secs: ESTIMATED_SECS_PER_BOOK,
        })
    }

    /// Snapshot of one job.
    pub fn get_status(&self, job_id: &str) -> Option<PipelineJob> {
        self.inner.store.get(job_id)
    }

    /// Most recent jobs, newest first.
    pub fn list_jobs(&self, limit: usize) -> Vec<PipelineJob> {
        self.inner.store.list_recent(limit)
    }

    /// Cancel a job cooperatively.
    ///
    /// Marks the job and every open step cancelled and stops further step
    /// advancement. Already-dispatched external calls are not aborted;
    /// workers check job status before committing results. Returns whether
    /// the job was still cancellable.
    pub fn cancel(&self, job_id: &str) -> Result<bool> {
        let Some(job) = self.inner.store.get(job_id) else {
            return Err(Error::not_found("Job", job_id));
        };
        if job.is_terminal() {
            return Ok(false);
        }

        if let Some(token) = self.inner.job_tokens.get(job_id) {
            token.cancel();
        }
        self.inner.store.mutate(job_id, |job| job.cancel());
        self.inner.job_tokens.remove(job_id);

        info!(job_id = %job_id, "Job cancelled");
        Ok(true)
    }

    /// Cancel all running job tasks (process shutdown).
    pub fn shutdown(&self) {
        self.inner.root_token.cancel();
    }

    fn spawn_job_task(&self, job_id: String, input: JobInput) {
        let token = self.inner.root_token.child_token();
        self.inner.job_tokens.insert(job_id.clone(), token.clone());

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run_job(job_id, input, token).await;
        });
    }
}

impl OrchestratorInner {
    async fn run_job(self: Arc<Self>, job_id: String, input: JobInput, token: CancellationToken) {
        if !settle(&token).await {
            self.finalize_cancelled(&job_id);
            return;
        }

        let options = input.options().clone();
        let Some(seeds) = self.discover(&job_id, input, &token).await else {
            // discover already finalized the job (failure or cancellation)
            self.job_tokens.remove(&job_id);
            return;
        };

        self.clone().fan_out(&job_id, seeds, options, &token).await;
        self.job_tokens.remove(&job_id);
    }

    /// Resolve the job input into one book seed per sub-pipeline, driving the
    /// search/analyze step. Returns `None` after finalizing the job on
    /// failure or cancellation.
    async fn discover(
        &self,
        job_id: &str,
        input: JobInput,
        token: &CancellationToken,
    ) -> Option<Vec<BookSeed>> {
        match input {
            JobInput::Search { query, params } => {
                self.store.mutate(job_id, |job| {
                    job.status = JobStatus::Running;
                    job.set_step(
                        StepId::Search,
                        StepStatus::Running,
                        format!("Searching for \"{}\"", query),
                    );
                    job.advance_progress(10);
                });

                let search =
                    self.providers
                        .search
                        .search(&query, params.max_books, &params.formats);
                let hits = match cancellable(
                    token,
                    with_timeout(self.config.metadata_timeout, "search", search),
                )
                .await
                {
                    None => {
                        self.finalize_cancelled(job_id);
                        return None;
                    }
                    Some(Ok(hits)) => hits,
                    Some(Err(e)) => {
                        self.fail_job(job_id, StepId::Search, &e);
                        return None;
                    }
                };

                if hits.is_empty() {
                    self.fail_job(
                        job_id,
                        StepId::Search,
                        &Error::not_found("books matching", query.as_str()),
                    );
                    return None;
                }

                let seeds: Vec<BookSeed> = hits
                    .into_iter()
                    .take(params.max_books as usize)
                    .map(|hit| BookSeed {
                        title: hit.title,
                        author: hit.author,
                        source_url: hit.url,
                        format: hit.format,
                        file_path: None,
                    })
                    .collect();

                let found = seeds.len();
                self.store.mutate(job_id, |job| {
                    job.books = seeds
                        .iter()
                        .map(|s| BookRecord::new(s.title.clone(), s.author.clone(), s.source_url.clone()))
                        .collect();
                    job.set_step(
                        StepId::Search,
                        StepStatus::Completed,
                        format!("Found {} book(s)", found),
                    );
                    job.advance_progress(25);
                });

                Some(seeds)
            }

            JobInput::Link { params } => {
                self.store.mutate(job_id, |job| {
                    job.status = JobStatus::Running;
                    job.set_step(StepId::Analyze, StepStatus::Running, "Analyzing link");
                    job.advance_progress(10);
                });

                let seed = match cancellable(token, self.resolve_link(&params)).await {
                    None => {
                        self.finalize_cancelled(job_id);
                        return None;
                    }
                    Some(Ok(seed)) => seed,
                    Some(Err(e)) => {
                        self.fail_job(job_id, StepId::Analyze, &e);
                        return None;
                    }
                };

                self.store.mutate(job_id, |job| {
                    job.books = vec![BookRecord::new(
                        seed.title.clone(),
                        seed.author.clone(),
                        seed.source_url.clone(),
                    )];
                    job.set_step(
                        StepId::Analyze,
                        StepStatus::Completed,
                        format!("Resolved \"{}\"", seed.title),
                    );
                    job.advance_progress(25);
                });

                Some(vec![seed])
            }

            JobInput::Upload { params } => {
                self.store.mutate(job_id, |job| {
                    job.status = JobStatus::Running;
                    job.set_step(
                        StepId::Analyze,
                        StepStatus::Running,
                        "Validating uploaded file",
                    );
                    job.advance_progress(10);
                });

                if tokio::fs::metadata(&params.file_path).await.is_err() {
                    self.fail_job(
                        job_id,
                        StepId::Analyze,
                        &Error::validation(format!(
                            "uploaded file not found: {}",
                            params.file_path
                        )),
                    );
                    return None;
                }

                let title = params
                    .title
                    .clone()
                    .unwrap_or_else(|| file_stem(&params.file_path));
                let author = params
                    .author
                    .clone()
                    .unwrap_or_else(|| "Unknown".to_string());
                let seed = BookSeed {
                    title: title.clone(),
                    author,
                    source_url: params.file_path.clone(),
                    format: None,
                    file_path: Some(params.file_path.clone()),
                };

                self.store.mutate(job_id, |job| {
                    job.books = vec![BookRecord::new(
                        seed.title.clone(),
                        seed.author.clone(),
                        seed.source_url.clone(),
                    )];
                    job.set_step(
                        StepId::Analyze,
                        StepStatus::Completed,
                        format!("Accepted \"{}\"", title),
                    );
                    job.advance_progress(25);
                });

                Some(vec![seed])
            }
        }
    }

    /// Resolve a direct link to book metadata and a concrete download URL.
    ///
    /// Recognized archive domains go through the search provider's detail
    /// lookup (picking the preferred mirror); anything else through generic
    /// link analysis.
    async fn resolve_link(&self, params: &CreateFromLinkParams) -> Result<BookSeed> {
        let host = Url::parse(&params.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
            .unwrap_or_default();
        let is_archive = self
            .config
            .archive_domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d)));

        if is_archive {
            let details = with_timeout(
                self.config.metadata_timeout,
                "detail lookup",
                self.providers.search.get_details(&params.url),
            )
            .await?;
            let download_url = preferred_download_link(
                &details.download_links,
                &self.config.primary_download_source,
            )
            .map(|l| l.url.clone())
            .unwrap_or_else(|| params.url.clone());

            Ok(BookSeed {
                title: params.title.clone().unwrap_or(details.title),
                author: params.author.clone().unwrap_or(details.author),
                source_url: download_url,
                format: details.format,
                file_path: None,
            })
        } else {
            let analysis = with_timeout(
                self.config.metadata_timeout,
                "link analysis",
                self.providers.search.analyze_link(&params.url),
            )
            .await?;

            Ok(BookSeed {
                title: params.title.clone().unwrap_or(analysis.title),
                author: params.author.clone().unwrap_or(analysis.author),
                source_url: params.url.clone(),
                format: analysis.format,
                file_path: None,
            })
        }
    }

    /// Launch one sub-pipeline per book and aggregate their events until
    /// every Book Record is terminal.
    async fn fan_out(
        self: Arc<Self>,
        job_id: &str,
        seeds: Vec<BookSeed>,
        options: JobOptions,
        token: &CancellationToken,
    ) {
        let (tx, mut rx) = mpsc::channel::<BookEvent>(64);
        // Books that skip the download phase (uploads) start with that band
        // already earned.
        let mut tracker: Vec<BookProgress> = seeds
            .iter()
            .map(|s| BookProgress {
                downloaded: s.file_path.is_some(),
                ..BookProgress::default()
            })
            .collect();

        for (index, seed) in seeds.into_iter().enumerate() {
            let inner = self.clone();
            let job_id = job_id.to_string();
            let options = options.clone();
            let token = token.child_token();
            let tx = tx.clone();
            tokio::spawn(async move {
                inner
                    .run_book(&job_id, index, seed, options, token, tx)
                    .await;
            });
        }
        drop(tx);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    self.finalize_cancelled(job_id);
                    return;
                }
                event = rx.recv() => match event {
                    Some(event) => {
                        self.apply_book_event(job_id, &mut tracker, event);
                        if tracker.iter().all(|b| b.terminal) {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }

        self.finalize(job_id);
    }

    /// Apply one sub-pipeline event to the job snapshot. Runs on the owning
    /// job task only, preserving the single-writer contract.
    fn apply_book_event(&self, job_id: &str, tracker: &mut [BookProgress], event: BookEvent) {
        let total = tracker.len();

        match event {
            BookEvent::DownloadStarted { index } => {
                self.store.mutate(job_id, |job| {
                    let title = job
                        .books
                        .get(index)
                        .map(|b| b.title.clone())
                        .unwrap_or_default();
                    job.set_step(
                        StepId::Download,
                        StepStatus::Running,
                        format!("Downloading \"{}\"", title),
                    );
                });
            }
            BookEvent::Downloaded { index } => {
                if let Some(book) = tracker.get_mut(index) {
                    book.downloaded = true;
                }
                let all_done = tracker.iter().all(|b| b.downloaded || b.terminal);
                let done = tracker.iter().filter(|b| b.downloaded).count();
                let progress = blended_progress(tracker);
                self.store.mutate(job_id, |job| {
                    if let Some(book) = job.books.get_mut(index) {
                        book.status = Some(BookStatus::Downloaded);
                    }
                    let message = if total == 1 {
                        let title = job
                            .books
                            .get(index)
                            .map(|b| b.title.clone())
                            .unwrap_or_default();
                        format!("Downloaded \"{}\"", title)
                    } else {
                        format!("Downloaded {} of {} books", done, total)
                    };
                    if all_done {
                        job.set_step(StepId::Download, StepStatus::Completed, message);
                    } else {
                        job.set_step_message(StepId::Download, message);
                    }
                    job.advance_progress(progress);
                });
            }
            BookEvent::ParseStarted { .. } => {
                self.store.mutate(job_id, |job| {
                    job.set_step(StepId::Parse, StepStatus::Running, "Extracting chapters");
                });
            }
            BookEvent::Parsed {
                index,
                chapter_count,
            } => {
                if let Some(book) = tracker.get_mut(index) {
                    book.parsed = true;
                }
                let all_done = tracker.iter().all(|b| b.parsed || b.terminal);
                let progress = blended_progress(tracker);
                self.store.mutate(job_id, |job| {
                    let message = format!("Extracted {} chapter(s)", chapter_count);
                    if all_done {
                        job.set_step(StepId::Parse, StepStatus::Completed, message);
                    } else {
                        job.set_step_message(StepId::Parse, message);
                    }
                    job.advance_progress(progress);
                });
            }
            BookEvent::SummarizeStarted { .. } => {
                self.store.mutate(job_id, |job| {
                    job.set_step(
                        StepId::Summarize,
                        StepStatus::Running,
                        "Summarizing chapters",
                    );
                });
            }
            BookEvent::Summarized {
                index,
                summarized,
                total: chapter_total,
            } => {
                if let Some(book) = tracker.get_mut(index) {
                    book.summarized = true;
                }
                let all_done = tracker.iter().all(|b| b.summarized || b.terminal);
                self.store.mutate(job_id, |job| {
                    let message =
                        format!("Summarized {} of {} chapter(s)", summarized, chapter_total);
                    if all_done {
                        job.set_step(StepId::Summarize, StepStatus::Completed, message);
                    } else {
                        job.set_step_message(StepId::Summarize, message);
                    }
                });
            }
            BookEvent::SynthesisStarted {
                index,
                total_chapters,
            } => {
                if let Some(book) = tracker.get_mut(index) {
                    book.synthesis_started = true;
                    book.chapters_total = total_chapters;
                }
                let progress = blended_progress(tracker);
                self.store.mutate(job_id, |job| {
                    job.set_step(StepId::Tts, StepStatus::Running, "Generating audio");
                    job.advance_progress(progress);
                });
            }
            BookEvent::ChapterSynthesized { index, chapter } => {
                if let Some(book) = tracker.get_mut(index) {
                    book.chapters_done += 1;
                }
                let done: u32 = tracker.iter().map(|b| b.chapters_done).sum();
                let expected: u32 = tracker.iter().map(|b| b.chapters_total).sum();
                let progress = blended_progress(tracker);
                self.store.mutate(job_id, |job| {
                    if let Some(book) = job.books.get_mut(index) {
                        book.chapters.push(chapter);
                    }
                    job.set_step_message(
                        StepId::Tts,
                        format!("Synthesized {} of {} chapter(s)", done, expected),
                    );
                    job.advance_progress(progress);
                });
            }
            BookEvent::BookSucceeded { index } => {
                if let Some(book) = tracker.get_mut(index) {
                    book.terminal = true;
                }
                let progress = blended_progress(tracker);
                self.store.mutate(job_id, |job| {
                    if let Some(book) = job.books.get_mut(index) {
                        book.status = Some(BookStatus::AudioGenerated);
                    }
                    job.advance_progress(progress);
                });
            }
            BookEvent::BookFailed { index, step, error } => {
                if let Some(book) = tracker.get_mut(index) {
                    book.terminal = true;
                }
                self.store.mutate(job_id, |job| {
                    if let Some(book) = job.books.get_mut(index) {
                        book.status = Some(BookStatus::Failed);
                        book.error = Some(error.clone());
                    }
                    // One failed book only fails the whole job when no book
                    // succeeds; then the failing step carries the last error.
                    let all_terminal = job.books.iter().all(|b| b.is_terminal());
                    let none_succeeded = job.books.iter().all(|b| !b.succeeded());
                    if all_terminal && none_succeeded {
                        job.set_step(step, StepStatus::Failed, error.clone());
                    }
                });
                warn!(job_id = %job_id, book = index, step = step.as_str(), error = %error, "Book sub-pipeline failed");
            }
        }
    }

    /// Finalize a job once every book is terminal: completed when at least
    /// one book succeeded, failed otherwise.
    fn finalize(&self, job_id: &str) {
        let Some(snapshot) = self.store.get(job_id) else {
            return;
        };
        if snapshot.is_terminal() {
            return;
        }

        let succeeded = snapshot.books.iter().filter(|b| b.succeeded()).count();
        let total = snapshot.books.len();

        if succeeded > 0 {
            self.store.mutate(job_id, |job| {
                job.set_step(
                    StepId::Tts,
                    StepStatus::Completed,
                    "Audio generation finished",
                );
                job.set_step(
                    StepId::Complete,
                    StepStatus::Completed,
                    format!("Converted {} of {} book(s)", succeeded, total),
                );
                job.status = JobStatus::Completed;
                job.advance_progress(100);
                job.completed_at = Some(chrono::Utc::now());
            });
            info!(job_id = %job_id, succeeded, total, "Job completed");
        } else {
            self.store.mutate(job_id, |job| {
                let error = job
                    .books
                    .iter()
                    .find_map(|b| b.error.clone())
                    .unwrap_or_else(|| "all books failed".to_string());
                job.status = JobStatus::Failed;
                job.error = Some(error);
                job.completed_at = Some(chrono::Utc::now());
            });
            warn!(job_id = %job_id, total, "Job failed: no book succeeded");
        }
    }

    fn finalize_cancelled(&self, job_id: &str) {
        self.store.mutate(job_id, |job| job.cancel());
    }

    /// Mark a step failed and finish the job. Used for failures before
    /// fan-out; per-book failures go through `BookEvent::BookFailed`.
    fn fail_job(&self, job_id: &str, step: StepId, error: &Error) {
        let message = error.to_string();
        self.store.mutate(job_id, |job| {
            job.set_step(step, StepStatus::Failed, message.clone());
            job.status = JobStatus::Failed;
            job.error = Some(message.clone());
            job.completed_at = Some(chrono::Utc::now());
        });
        warn!(job_id = %job_id, step = step.as_str(), error = %message, "Job failed");
    }

    /// Drive one book through download → parse → summarize? → tts, emitting
    /// events to the owning job task.
    async fn run_book(
        &self,
        job_id: &str,
        index: usize,
        seed: BookSeed,
        options: JobOptions,
        token: CancellationToken,
        events: mpsc::Sender<BookEvent>,
    ) {
        match self
            .run_book_inner(job_id, index, seed, &options, &token, &events)
            .await
        {
            Ok(true) => {
                let _ = events.send(BookEvent::BookSucceeded { index }).await;
            }
            // Cancelled mid-flight: the job task finalizes via its own token.
            Ok(false) => {}
            Err((step, error)) => {
                let _ = events
                    .send(BookEvent::BookFailed { index, step, error })
                    .await;
            }
        }
    }

    async fn run_book_inner(
        &self,
        job_id: &str,
        index: usize,
        seed: BookSeed,
        options: &JobOptions,
        token: &CancellationToken,
        events: &mpsc::Sender<BookEvent>,
    ) -> std::result::Result<bool, (StepId, String)> {
        let book_id = format!("{}-b{}", job_id, index + 1);
        let voice = options
            .voice
            .clone()
            .unwrap_or_else(|| self.config.default_voice.clone());
        let speed = options.speed.unwrap_or(self.config.default_speed);

        // Download (skipped for upload jobs)
        let file_path = match seed.file_path.clone() {
            Some(path) => path,
            None => {
                let _ = events.send(BookEvent::DownloadStarted { index }).await;

                let enqueued = self
                    .download_manager
                    .enqueue(
                        &seed.source_url,
                        &seed.title,
                        &seed.author,
                        seed.format.clone(),
                        PRIORITY_PIPELINE,
                        Some(job_id.to_string()),
                    )
                    .await
                    .map_err(|e| (StepId::Download, e.to_string()))?;

                let output = match self
                    .await_entry(&self.download_queue, &enqueued.entry_id, token)
                    .await
                    .map_err(|e| (StepId::Download, e))?
                {
                    AwaitedEntry::Cancelled => return Ok(false),
                    AwaitedEntry::Failed(error) => return Err((StepId::Download, error)),
                    AwaitedEntry::Completed(output) => output,
                };
                let WorkOutput::Downloaded { file_path, .. } = output else {
                    return Err((StepId::Download, "unexpected download result".to_string()));
                };

                let _ = events.send(BookEvent::Downloaded { index }).await;
                if !settle(token).await {
                    return Ok(false);
                }
                file_path
            }
        };

        // Parse
        let _ = events.send(BookEvent::ParseStarted { index }).await;
        let enqueued = self
            .extraction_queue
            .enqueue(
                &WorkPayload::Extract {
                    file_path: file_path.clone(),
                    book_id: book_id.clone(),
                },
                PRIORITY_PIPELINE,
                Some(job_id.to_string()),
            )
            .await
            .map_err(|e| (StepId::Parse, e.to_string()))?;

        let output = match self
            .await_entry(&self.extraction_queue, &enqueued.entry_id, token)
            .await
            .map_err(|e| (StepId::Parse, e))?
        {
            AwaitedEntry::Cancelled => return Ok(false),
            AwaitedEntry::Failed(error) => return Err((StepId::Parse, error)),
            AwaitedEntry::Completed(output) => output,
        };
        let WorkOutput::Extracted { chapters } = output else {
            return Err((StepId::Parse, "unexpected extraction result".to_string()));
        };

        let _ = events
            .send(BookEvent::Parsed {
                index,
                chapter_count: chapters.len() as u32,
            })
            .await;
        if !settle(token).await {
            return Ok(false);
        }

        // Summarize (best-effort; failures fall back to the original text)
        let chapters: Vec<(ExtractedChapter, bool)> = if options.summarize {
            let _ = events.send(BookEvent::SummarizeStarted { index }).await;
            let total = chapters.len() as u32;
            let (chapters, summarized) = self
                .summarize_chapters(chapters, &options.summary_style, token)
                .await;
            let _ = events
                .send(BookEvent::Summarized {
                    index,
                    summarized,
                    total,
                })
                .await;
            if !settle(token).await {
                return Ok(false);
            }
            chapters
        } else {
            chapters.into_iter().map(|c| (c, false)).collect()
        };

        // Synthesis: one queue entry per chapter
        let _ = events
            .send(BookEvent::SynthesisStarted {
                index,
                total_chapters: chapters.len() as u32,
            })
            .await;

        let mut pending = Vec::with_capacity(chapters.len());
        for (chapter, from_summary) in chapters {
            let enqueued = self
                .synthesis_queue
                .enqueue(
                    &WorkPayload::Synthesize {
                        text: chapter.text.clone(),
                        voice: voice.clone(),
                        speed,
                        book_id: book_id.clone(),
                        chapter_index: chapter.chapter_number,
                        chapter_title: chapter.title.clone(),
                        from_summary,
                    },
                    PRIORITY_PIPELINE,
                    Some(job_id.to_string()),
                )
                .await
                .map_err(|e| (StepId::Tts, e.to_string()))?;
            pending.push((enqueued.entry_id, chapter, from_summary));
        }

        for (entry_id, chapter, from_summary) in pending {
            let output = match self
                .await_entry(&self.synthesis_queue, &entry_id, token)
                .await
                .map_err(|e| (StepId::Tts, e))?
            {
                AwaitedEntry::Cancelled => return Ok(false),
                AwaitedEntry::Failed(error) => return Err((StepId::Tts, error)),
                AwaitedEntry::Completed(output) => output,
            };
            let WorkOutput::Synthesized {
                audio_path,
                duration_secs,
                size_bytes,
            } = output
            else {
                return Err((StepId::Tts, "unexpected synthesis result".to_string()));
            };

            let _ = events
                .send(BookEvent::ChapterSynthesized {
                    index,
                    chapter: AudioChapter {
                        index: chapter.chapter_number,
                        title: chapter.title,
                        audio_path,
                        duration_secs,
                        size_bytes,
                        from_summary,
                    },
                })
                .await;
        }

        Ok(true)
    }

    /// Summarize each chapter with an independent timeout, keeping the
    /// original text whenever the service fails. Returns the chapters plus
    /// how many were actually summarized.
    async fn summarize_chapters(
        &self,
        chapters: Vec<ExtractedChapter>,
        style: &str,
        token: &CancellationToken,
    ) -> (Vec<(ExtractedChapter, bool)>, u32) {
        let mut out = Vec::with_capacity(chapters.len());
        let mut summarized = 0u32;

        for mut chapter in chapters {
            if token.is_cancelled() {
                out.push((chapter, false));
                continue;
            }

            let result = with_timeout(
                self.config.summarize_timeout,
                "summarize",
                self.providers
                    .summarizer
                    .summarize(&chapter.text, style, 2_000, "book-chapter"),
            )
            .await;

            match result {
                Ok(summary) => {
                    chapter.text = summary.summary;
                    summarized += 1;
                    out.push((chapter, true));
                }
                Err(e) => {
                    warn!(
                        chapter = chapter.chapter_number,
                        "Summarization fell back to original text: {}", e
                    );
                    out.push((chapter, false));
                }
            }
        }

        (out, summarized)
    }

    /// Wait for a queue entry to settle, translating the terminal status.
    async fn await_entry(
        &self,
        queue: &WorkQueue,
        entry_id: &str,
        token: &CancellationToken,
    ) -> std::result::Result<AwaitedEntry, String> {
        match queue.wait_terminal(entry_id, token).await {
            Err(e) => Err(e.to_string()),
            Ok(None) => Ok(AwaitedEntry::Cancelled),
            Ok(Some(EntryStatus::Cancelled)) => Ok(AwaitedEntry::Cancelled),
            Ok(Some(EntryStatus::Completed)) => match queue.get_result(entry_id).await {
                Ok(Some(output)) => Ok(AwaitedEntry::Completed(output)),
                Ok(None) => Err("completed entry published no result".to_string()),
                Err(e) => Err(e.to_string()),
            },
            Ok(Some(EntryStatus::Failed)) => {
                let error = queue
                    .get_last_error(entry_id)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| "work unit failed".to_string());
                Ok(AwaitedEntry::Failed(error))
            }
            Ok(Some(other)) => Err(format!("unexpected terminal status {:?}", other)),
        }
    }
}

enum AwaitedEntry {
    Completed(WorkOutput),
    Failed(String),
    Cancelled,
}

/// Race a future against the cancellation token.
async fn cancellable<T>(token: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        _ = token.cancelled() => None,
        value = fut => Some(value),
    }
}

/// Sleep out the settling delay; false when cancelled first.
async fn settle(token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(STEP_SETTLE) => true,
    }
}

async fn with_timeout<T>(
    duration: Duration,
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(operation, duration.as_secs())),
    }
}

fn file_stem(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
