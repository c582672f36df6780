//! End-to-end pipeline tests with stub collaborators.
//!
//! Exercises the orchestrator, queues, and worker pools against in-process
//! stub providers: monotonic progress, dedup idempotence, terminal
//! immutability, partial multi-book success, retry exhaustion, cooperative
//! cancellation, and the full conversion scenario.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use bookforge::config::AppConfig;
use bookforge::database::models::EntryStatus;
use bookforge::pipeline::{
    BookStatus, CreateAudiobookParams, CreateFromLinkParams, CreateFromUploadParams, JobOptions,
    JobStatus, PipelineJob, StepId, StepStatus,
};
use bookforge::providers::{
    BookDetails, BookHit, DownloadLink, DownloadTransport, DownloadedFile, ExtractedChapter,
    ExtractionService, LinkAnalysis, Providers, SearchProvider, SpeechService,
    SummarizationService, Summary, SynthesisRequest, SynthesizedAudio,
};
use bookforge::queue::EnqueueOutcome;
use bookforge::services::ServiceContainer;
use bookforge::{Error, Result};

// ---------------------------------------------------------------------------
// Stub collaborators
// ---------------------------------------------------------------------------

struct StubSearch {
    hits: Vec<BookHit>,
    details: Option<BookDetails>,
    detail_calls: AtomicU32,
    analyze_calls: AtomicU32,
}

impl StubSearch {
    fn with_hits(hits: Vec<BookHit>) -> Self {
        Self {
            hits,
            details: None,
            detail_calls: AtomicU32::new(0),
            analyze_calls: AtomicU32::new(0),
        }
    }

    fn with_details(details: BookDetails) -> Self {
        Self {
            hits: Vec::new(),
            details: Some(details),
            detail_calls: AtomicU32::new(0),
            analyze_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl SearchProvider for StubSearch {
    async fn search(&self, _query: &str, limit: u32, _formats: &[String]) -> Result<Vec<BookHit>> {
        Ok(self.hits.iter().take(limit as usize).cloned().collect())
    }

    async fn get_details(&self, url: &str) -> Result<BookDetails> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.details
            .clone()
            .ok_or_else(|| Error::not_found("BookDetails", url))
    }

    async fn analyze_link(&self, _url: &str) -> Result<LinkAnalysis> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        Ok(LinkAnalysis {
            title: "Linked Book".to_string(),
            author: "Link Author".to_string(),
            format: Some("epub".to_string()),
        })
    }
}

/// Writes a small file for every URL; URLs containing "always-fails" error
/// on every attempt.
struct StubTransport {
    delay: Duration,
}

impl StubTransport {
    fn instant() -> Self {
        Self {
            delay: Duration::from_millis(10),
        }
    }

    fn slow(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl DownloadTransport for StubTransport {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<DownloadedFile> {
        tokio::time::sleep(self.delay).await;
        if url.contains("always-fails") {
            return Err(Error::download("mirror unreachable"));
        }
        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(format!("{}.epub", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, b"book bytes").await?;
        Ok(DownloadedFile {
            path,
            size_bytes: 10,
        })
    }
}

struct StubExtraction {
    chapters: u32,
}

#[async_trait]
impl ExtractionService for StubExtraction {
    async fn extract(&self, _file_path: &str) -> Result<Vec<ExtractedChapter>> {
        Ok((1..=self.chapters)
            .map(|i| ExtractedChapter {
                chapter_number: i,
                title: format!("Chapter {}", i),
                text: format!("Text of chapter {}", i),
            })
            .collect())
    }
}

struct StubSummarizer {
    fail: bool,
}

#[async_trait]
impl SummarizationService for StubSummarizer {
    async fn summarize(
        &self,
        text: &str,
        _style: &str,
        _max_length: u32,
        _content_type: &str,
    ) -> Result<Summary> {
        if self.fail {
            return Err(Error::service_unavailable("summarizer offline"));
        }
        Ok(Summary {
            summary: format!("Summary: {}", &text[..text.len().min(20)]),
            compression_ratio: 0.4,
        })
    }
}

struct StubSpeech {
    fail: bool,
    calls: AtomicU32,
}

impl StubSpeech {
    fn ok() -> Self {
        Self {
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl SpeechService for StubSpeech {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::synthesis("synthesis backend offline"));
        }
        Ok(SynthesizedAudio {
            audio_path: format!("/audio/{}/chapter_{}.mp3", request.book_id, request.chapter_id),
            duration_secs: 12.5,
            size_bytes: 4_096,
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn hit(title: &str, url: &str) -> BookHit {
    BookHit {
        title: title.to_string(),
        author: "Test Author".to_string(),
        url: url.to_string(),
        format: Some("epub".to_string()),
    }
}

fn test_config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.database_url = format!("sqlite:{}?mode=rwc", dir.path().join("test.db").display());
    config.storage.download_dir = dir.path().join("downloads");
    config.storage.audio_dir = dir.path().join("audio");

    // Fast retry policies so exhaustion tests finish quickly.
    config.queues.download.max_attempts = 2;
    config.queues.download.base_delay_ms = 10;
    config.queues.download.max_delay_ms = 50;
    config.queues.extraction.base_delay_ms = 10;
    config.queues.extraction.max_delay_ms = 50;
    config.queues.synthesis.base_delay_ms = 10;
    config.queues.synthesis.max_delay_ms = 50;

    config.providers.metadata_timeout = Duration::from_secs(2);
    config.providers.summarize_timeout = Duration::from_secs(1);
    config
}

fn providers(
    search: StubSearch,
    transport: StubTransport,
    chapters: u32,
    summarizer: StubSummarizer,
    speech: StubSpeech,
) -> (Providers, Arc<StubSearch>, Arc<StubSpeech>) {
    let search = Arc::new(search);
    let speech = Arc::new(speech);
    let bundle = Providers {
        search: search.clone(),
        download: Arc::new(transport),
        extraction: Arc::new(StubExtraction { chapters }),
        summarizer: Arc::new(summarizer),
        speech: speech.clone(),
    };
    (bundle, search, speech)
}

async fn started_container(dir: &TempDir, bundle: Providers) -> ServiceContainer {
    let container = ServiceContainer::with_providers(test_config(dir), bundle)
        .await
        .expect("container init");
    container.start();
    container
}

/// Poll a job until the predicate holds, collecting progress samples.
async fn wait_for_job<F>(
    container: &ServiceContainer,
    job_id: &str,
    timeout: Duration,
    pred: F,
) -> (PipelineJob, Vec<u8>)
where
    F: Fn(&PipelineJob) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    let mut samples = Vec::new();

    loop {
        let job = container
            .orchestrator
            .get_status(job_id)
            .expect("job should be tracked");
        samples.push(job.progress);
        if pred(&job) {
            return (job, samples);
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "timed out waiting for job {}: status={:?} progress={}",
                job_id, job.status, job.progress
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn step_status(job: &PipelineJob, id: StepId) -> StepStatus {
    job.step(id).expect("step should exist").status
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_end_to_end_search_job() {
    let dir = TempDir::new().unwrap();
    let (bundle, _search, _speech) = providers(
        StubSearch::with_hits(vec![hit("Foundation", "https://mirror.example/foundation.epub")]),
        StubTransport::instant(),
        2,
        StubSummarizer { fail: false },
        StubSpeech::ok(),
    );
    let container = started_container(&dir, bundle).await;

    let created = container
        .orchestrator
        .create_audiobook(CreateAudiobookParams {
            search_query: "Foundation".to_string(),
            formats: vec!["epub".to_string(), "pdf".to_string()],
            max_books: 1,
            options: JobOptions::default(),
        })
        .expect("create should succeed");

    let (job, samples) = wait_for_job(
        &container,
        &created.job_id,
        Duration::from_secs(15),
        |j| j.status.is_terminal(),
    )
    .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.completed_at.is_some());

    assert_eq!(job.books.len(), 1);
    assert_eq!(job.books[0].status, Some(BookStatus::AudioGenerated));
    assert_eq!(job.books[0].chapters.len(), 2);
    assert!(job.books[0].chapters.iter().all(|c| !c.audio_path.is_empty()));

    for step in [
        StepId::Search,
        StepId::Download,
        StepId::Parse,
        StepId::Tts,
        StepId::Complete,
    ] {
        assert_eq!(step_status(&job, step), StepStatus::Completed, "{:?}", step);
    }

    // Monotonic progress: every observed sample is >= the previous one.
    assert!(samples.windows(2).all(|w| w[0] <= w[1]), "{:?}", samples);

    container.shutdown().await;
}

#[tokio::test]
async fn test_dedup_enqueue_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let (bundle, _search, _speech) = providers(
        StubSearch::with_hits(vec![]),
        StubTransport::instant(),
        1,
        StubSummarizer { fail: false },
        StubSpeech::ok(),
    );
    // Workers intentionally not started: entries must stay unresolved.
    let container = ServiceContainer::with_providers(test_config(&dir), bundle)
        .await
        .unwrap();

    let first = container
        .download_manager
        .enqueue("https://Example.org/book/", "Book", "Author", None, 10, None)
        .await
        .unwrap();
    assert_eq!(first.outcome, EnqueueOutcome::Queued);

    // Same URL modulo normalization: same entry, no new queue item.
    let second = container
        .download_manager
        .enqueue("https://example.org/book", "Book", "Author", None, 10, None)
        .await
        .unwrap();
    assert_eq!(second.outcome, EnqueueOutcome::Exists);
    assert_eq!(second.entry_id, first.entry_id);

    let queued = container
        .download_queue
        .repository()
        .list_entries(Some(EntryStatus::Queued), 10)
        .await
        .unwrap();
    assert_eq!(queued.len(), 1);
}

#[tokio::test]
async fn test_partial_multi_book_success() {
    let dir = TempDir::new().unwrap();
    let (bundle, _search, _speech) = providers(
        StubSearch::with_hits(vec![
            hit("Book One", "https://mirror.example/one.epub"),
            hit("Book Two", "https://mirror.example/always-fails-two.epub"),
            hit("Book Three", "https://mirror.example/three.epub"),
        ]),
        StubTransport::instant(),
        1,
        StubSummarizer { fail: false },
        StubSpeech::ok(),
    );
    let container = started_container(&dir, bundle).await;

    let created = container
        .orchestrator
        .create_audiobook(CreateAudiobookParams {
            search_query: "trilogy".to_string(),
            formats: vec!["epub".to_string()],
            max_books: 3,
            options: JobOptions::default(),
        })
        .unwrap();

    let (job, _) = wait_for_job(
        &container,
        &created.job_id,
        Duration::from_secs(20),
        |j| j.status.is_terminal(),
    )
    .await;

    // One failed download must not fail the whole job.
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.books.len(), 3);

    let generated = job
        .books
        .iter()
        .filter(|b| b.status == Some(BookStatus::AudioGenerated))
        .count();
    let failed: Vec<_> = job
        .books
        .iter()
        .filter(|b| b.status == Some(BookStatus::Failed))
        .collect();
    assert_eq!(generated, 2);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].title, "Book Two");
    assert!(failed[0].error.as_deref().unwrap().contains("mirror unreachable"));

    container.shutdown().await;
}

#[tokio::test]
async fn test_retry_exhaustion_marks_tts_step_failed() {
    let dir = TempDir::new().unwrap();
    let (bundle, _search, speech) = providers(
        StubSearch::with_hits(vec![hit("Doomed", "https://mirror.example/doomed.epub")]),
        StubTransport::instant(),
        1,
        StubSummarizer { fail: false },
        StubSpeech::failing(),
    );
    let container = started_container(&dir, bundle).await;
    let max_attempts = container.config.queues.synthesis.max_attempts;

    let started = std::time::Instant::now();
    let created = container
        .orchestrator
        .create_audiobook(CreateAudiobookParams {
            search_query: "doomed".to_string(),
            formats: vec![],
            max_books: 1,
            options: JobOptions::default(),
        })
        .unwrap();

    let (job, _) = wait_for_job(
        &container,
        &created.job_id,
        Duration::from_secs(20),
        |j| j.status.is_terminal(),
    )
    .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.books[0].status, Some(BookStatus::Failed));

    // Exactly the configured number of attempts, with backoff in between.
    assert_eq!(speech.calls.load(Ordering::SeqCst), max_attempts);
    assert!(started.elapsed() >= Duration::from_millis(150));

    let tts = job.step(StepId::Tts).unwrap();
    assert_eq!(tts.status, StepStatus::Failed);
    assert!(tts.message.contains("synthesis backend offline"));
    assert!(job.error.as_deref().unwrap().contains("synthesis backend offline"));

    let failed_entries = container
        .synthesis_queue
        .repository()
        .list_history(Some(EntryStatus::Failed), 10, 0)
        .await
        .unwrap();
    assert_eq!(failed_entries.len(), 1);
    assert_eq!(failed_entries[0].attempts, max_attempts as i64);

    container.shutdown().await;
}

#[tokio::test]
async fn test_cancellation_during_download() {
    let dir = TempDir::new().unwrap();
    let (bundle, _search, _speech) = providers(
        StubSearch::with_hits(vec![hit("Slow", "https://mirror.example/slow.epub")]),
        StubTransport::slow(Duration::from_secs(5)),
        1,
        StubSummarizer { fail: false },
        StubSpeech::ok(),
    );
    let container = started_container(&dir, bundle).await;

    let created = container
        .orchestrator
        .create_audiobook(CreateAudiobookParams {
            search_query: "slow".to_string(),
            formats: vec![],
            max_books: 1,
            options: JobOptions::default(),
        })
        .unwrap();

    wait_for_job(&container, &created.job_id, Duration::from_secs(10), |j| {
        j.step(StepId::Download)
            .map(|s| s.status == StepStatus::Running)
            .unwrap_or(false)
    })
    .await;

    assert!(container.orchestrator.cancel(&created.job_id).unwrap());

    let job = container.orchestrator.get_status(&created.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(step_status(&job, StepId::Download), StepStatus::Cancelled);
    assert_eq!(step_status(&job, StepId::Complete), StepStatus::Cancelled);
    assert_eq!(step_status(&job, StepId::Search), StepStatus::Completed);

    // Nothing advances after the cancellation point.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let later = container.orchestrator.get_status(&created.job_id).unwrap();
    assert_eq!(later.status, JobStatus::Cancelled);
    assert!(later.steps.iter().all(|s| s.status != StepStatus::Running));

    // Cancelling again is a no-op on a terminal job.
    assert!(!container.orchestrator.cancel(&created.job_id).unwrap());

    container.shutdown().await;
}

#[tokio::test]
async fn test_terminal_job_is_immutable() {
    let dir = TempDir::new().unwrap();
    let (bundle, _search, _speech) = providers(
        StubSearch::with_hits(vec![hit("Done", "https://mirror.example/done.epub")]),
        StubTransport::instant(),
        1,
        StubSummarizer { fail: false },
        StubSpeech::ok(),
    );
    let container = started_container(&dir, bundle).await;

    let created = container
        .orchestrator
        .create_audiobook(CreateAudiobookParams {
            search_query: "done".to_string(),
            formats: vec![],
            max_books: 1,
            options: JobOptions::default(),
        })
        .unwrap();

    let (job, _) = wait_for_job(
        &container,
        &created.job_id,
        Duration::from_secs(15),
        |j| j.status.is_terminal(),
    )
    .await;
    assert_eq!(job.status, JobStatus::Completed);

    assert!(!container.orchestrator.cancel(&created.job_id).unwrap());
    let after = container.orchestrator.get_status(&created.job_id).unwrap();
    assert_eq!(after.status, JobStatus::Completed);
    assert_eq!(after.progress, 100);

    container.shutdown().await;
}

#[tokio::test]
async fn test_create_validation_rejects_bad_input() {
    let dir = TempDir::new().unwrap();
    let (bundle, _search, _speech) = providers(
        StubSearch::with_hits(vec![]),
        StubTransport::instant(),
        1,
        StubSummarizer { fail: false },
        StubSpeech::ok(),
    );
    let container = ServiceContainer::with_providers(test_config(&dir), bundle)
        .await
        .unwrap();

    let empty_query = container.orchestrator.create_audiobook(CreateAudiobookParams {
        search_query: "   ".to_string(),
        formats: vec![],
        max_books: 1,
        options: JobOptions::default(),
    });
    assert!(matches!(empty_query, Err(Error::Validation(_))));

    let zero_books = container.orchestrator.create_audiobook(CreateAudiobookParams {
        search_query: "dune".to_string(),
        formats: vec![],
        max_books: 0,
        options: JobOptions::default(),
    });
    assert!(matches!(zero_books, Err(Error::Validation(_))));

    let bad_url = container.orchestrator.create_from_link(CreateFromLinkParams {
        url: "ftp://example.org/book.epub".to_string(),
        title: None,
        author: None,
        formats: vec![],
        options: JobOptions::default(),
    });
    assert!(matches!(bad_url, Err(Error::Validation(_))));

    // Rejected synchronously: no job record was created.
    assert!(container.orchestrator.list_jobs(10).is_empty());
}

#[tokio::test]
async fn test_from_link_uses_detail_lookup_on_archive_domain() {
    let dir = TempDir::new().unwrap();
    let (bundle, search, _speech) = providers(
        StubSearch::with_details(BookDetails {
            title: "Archive Book".to_string(),
            author: "Archive Author".to_string(),
            download_links: vec![
                DownloadLink {
                    url: "https://slow.example/dl/abc.epub".to_string(),
                    source: "ipfs".to_string(),
                },
                DownloadLink {
                    url: "https://partner.example/dl/abc.epub".to_string(),
                    source: "partner-server".to_string(),
                },
            ],
            format: Some("epub".to_string()),
        }),
        StubTransport::instant(),
        1,
        StubSummarizer { fail: false },
        StubSpeech::ok(),
    );
    let container = started_container(&dir, bundle).await;

    let created = container
        .orchestrator
        .create_from_link(CreateFromLinkParams {
            url: "https://annas-archive.org/md5/abc".to_string(),
            title: None,
            author: None,
            formats: vec![],
            options: JobOptions::default(),
        })
        .unwrap();

    let (job, _) = wait_for_job(
        &container,
        &created.job_id,
        Duration::from_secs(15),
        |j| j.status.is_terminal(),
    )
    .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(search.detail_calls.load(Ordering::SeqCst), 1);
    assert_eq!(search.analyze_calls.load(Ordering::SeqCst), 0);

    // The preferred mirror was selected over the first listed one.
    assert_eq!(job.books[0].source_url, "https://partner.example/dl/abc.epub");
    assert_eq!(job.books[0].title, "Archive Book");
    assert_eq!(step_status(&job, StepId::Analyze), StepStatus::Completed);

    container.shutdown().await;
}

#[tokio::test]
async fn test_from_link_generic_uses_analyzer() {
    let dir = TempDir::new().unwrap();
    let (bundle, search, _speech) = providers(
        StubSearch::with_hits(vec![]),
        StubTransport::instant(),
        1,
        StubSummarizer { fail: false },
        StubSpeech::ok(),
    );
    let container = started_container(&dir, bundle).await;

    let created = container
        .orchestrator
        .create_from_link(CreateFromLinkParams {
            url: "https://files.example.org/books/novel.epub".to_string(),
            title: None,
            author: None,
            formats: vec![],
            options: JobOptions::default(),
        })
        .unwrap();

    let (job, _) = wait_for_job(
        &container,
        &created.job_id,
        Duration::from_secs(15),
        |j| j.status.is_terminal(),
    )
    .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(search.analyze_calls.load(Ordering::SeqCst), 1);
    assert_eq!(search.detail_calls.load(Ordering::SeqCst), 0);
    assert_eq!(job.books[0].title, "Linked Book");

    container.shutdown().await;
}

#[tokio::test]
async fn test_upload_job_skips_download() {
    let dir = TempDir::new().unwrap();
    let uploaded = dir.path().join("uploaded-book.epub");
    tokio::fs::write(&uploaded, b"uploaded bytes").await.unwrap();

    let (bundle, _search, _speech) = providers(
        StubSearch::with_hits(vec![]),
        StubTransport::instant(),
        2,
        StubSummarizer { fail: false },
        StubSpeech::ok(),
    );
    let container = started_container(&dir, bundle).await;

    let created = container
        .orchestrator
        .create_from_upload(CreateFromUploadParams {
            file_path: uploaded.to_string_lossy().into_owned(),
            title: Some("Uploaded Book".to_string()),
            author: None,
            options: JobOptions::default(),
        })
        .unwrap();

    let (job, _) = wait_for_job(
        &container,
        &created.job_id,
        Duration::from_secs(15),
        |j| j.status.is_terminal(),
    )
    .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.step(StepId::Download).is_none());
    assert_eq!(job.books[0].status, Some(BookStatus::AudioGenerated));
    assert_eq!(job.books[0].chapters.len(), 2);

    container.shutdown().await;
}

#[tokio::test]
async fn test_summarization_failure_falls_back_to_original_text() {
    let dir = TempDir::new().unwrap();
    let (bundle, _search, _speech) = providers(
        StubSearch::with_hits(vec![hit("Verbose", "https://mirror.example/verbose.epub")]),
        StubTransport::instant(),
        2,
        StubSummarizer { fail: true },
        StubSpeech::ok(),
    );
    let container = started_container(&dir, bundle).await;

    let created = container
        .orchestrator
        .create_audiobook(CreateAudiobookParams {
            search_query: "verbose".to_string(),
            formats: vec![],
            max_books: 1,
            options: JobOptions {
                summarize: true,
                ..JobOptions::default()
            },
        })
        .unwrap();

    let (job, _) = wait_for_job(
        &container,
        &created.job_id,
        Duration::from_secs(15),
        |j| j.status.is_terminal(),
    )
    .await;

    // Summarization is best-effort: the job still completes on the original
    // text.
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(step_status(&job, StepId::Summarize), StepStatus::Completed);
    assert!(job.books[0].chapters.iter().all(|c| !c.from_summary));

    container.shutdown().await;
}

#[tokio::test]
async fn test_summarization_success_flags_chapters() {
    let dir = TempDir::new().unwrap();
    let (bundle, _search, _speech) = providers(
        StubSearch::with_hits(vec![hit("Verbose", "https://mirror.example/verbose2.epub")]),
        StubTransport::instant(),
        2,
        StubSummarizer { fail: false },
        StubSpeech::ok(),
    );
    let container = started_container(&dir, bundle).await;

    let created = container
        .orchestrator
        .create_audiobook(CreateAudiobookParams {
            search_query: "verbose".to_string(),
            formats: vec![],
            max_books: 1,
            options: JobOptions {
                summarize: true,
                ..JobOptions::default()
            },
        })
        .unwrap();

    let (job, _) = wait_for_job(
        &container,
        &created.job_id,
        Duration::from_secs(15),
        |j| j.status.is_terminal(),
    )
    .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.books[0].chapters.iter().all(|c| c.from_summary));

    container.shutdown().await;
}

#[tokio::test]
async fn test_search_with_no_results_fails_job() {
    let dir = TempDir::new().unwrap();
    let (bundle, _search, _speech) = providers(
        StubSearch::with_hits(vec![]),
        StubTransport::instant(),
        1,
        StubSummarizer { fail: false },
        StubSpeech::ok(),
    );
    let container = started_container(&dir, bundle).await;

    let created = container
        .orchestrator
        .create_audiobook(CreateAudiobookParams {
            search_query: "no such book".to_string(),
            formats: vec![],
            max_books: 1,
            options: JobOptions::default(),
        })
        .unwrap();

    let (job, _) = wait_for_job(
        &container,
        &created.job_id,
        Duration::from_secs(10),
        |j| j.status.is_terminal(),
    )
    .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(step_status(&job, StepId::Search), StepStatus::Failed);
    assert!(job.error.is_some());
    assert!(job.books.is_empty());

    container.shutdown().await;
}

#[tokio::test]
async fn test_queue_entries_survive_for_untracked_jobs() {
    // Entries recovered after a restart reference jobs the store no longer
    // tracks; workers must resolve them instead of executing blindly.
    let dir = TempDir::new().unwrap();
    let (bundle, _search, _speech) = providers(
        StubSearch::with_hits(vec![]),
        StubTransport::instant(),
        1,
        StubSummarizer { fail: false },
        StubSpeech::ok(),
    );
    let container = started_container(&dir, bundle).await;

    container
        .download_manager
        .enqueue(
            "https://mirror.example/ghost.epub",
            "Ghost",
            "Nobody",
            None,
            0,
            Some("job-from-previous-process".to_string()),
        )
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let history = container
            .download_queue
            .repository()
            .list_history(Some(EntryStatus::Cancelled), 10, 0)
            .await
            .unwrap();
        if history.len() == 1 {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("entry for untracked job was not resolved");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    container.shutdown().await;
}
