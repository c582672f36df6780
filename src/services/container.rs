//! Service container for dependency injection.
//!
//! The ServiceContainer wires the database, queues, worker pools, external
//! collaborators, and the orchestrator together and manages their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::server::AppState;
use crate::config::AppConfig;
use crate::database::repositories::{QueueRepository, SqlxQueueRepository};
use crate::database::{self, DbPool};
use crate::pipeline::{JobStore, PipelineOrchestrator};
use crate::providers::{
    HttpDownloadTransport, HttpExtractionService, HttpSearchProvider, HttpSpeechService,
    HttpSummarizationService, Providers,
};
use crate::queue::{
    DownloadExecutor, DownloadManager, ExtractionExecutor, QueueKind, SynthesisExecutor,
    WorkQueue, WorkerPool,
};
use crate::{Error, Result};

/// Interval between retention sweeps over terminal queue entries.
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: DbPool,
    /// Progress/status store.
    pub job_store: Arc<JobStore>,
    /// Work queues.
    pub download_queue: Arc<WorkQueue>,
    pub extraction_queue: Arc<WorkQueue>,
    pub synthesis_queue: Arc<WorkQueue>,
    /// Worker pools.
    pub download_pool: Arc<WorkerPool>,
    pub extraction_pool: Arc<WorkerPool>,
    pub synthesis_pool: Arc<WorkerPool>,
    /// Dedup & download manager.
    pub download_manager: Arc<DownloadManager>,
    /// Pipeline orchestrator.
    pub orchestrator: Arc<PipelineOrchestrator>,
    /// External collaborator handles.
    pub providers: Providers,
    /// Application configuration.
    pub config: AppConfig,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Create a container with HTTP collaborator implementations.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let providers = build_http_providers(&config)?;
        Self::with_providers(config, providers).await
    }

    /// Create a container with caller-supplied collaborators (used by tests
    /// to inject stubs).
    pub async fn with_providers(config: AppConfig, providers: Providers) -> Result<Self> {
        info!("Initializing service container");

        let pool = database::init_pool(&config.database_url).await?;
        database::run_migrations(&pool).await?;

        let repo: Arc<dyn QueueRepository> = Arc::new(SqlxQueueRepository::new(pool.clone()));

        // Claimed-but-unfinished entries from a previous process go back to
        // the queue instead of being silently lost.
        let requeued = repo.requeue_interrupted().await?;
        if requeued > 0 {
            warn!("Requeued {} interrupted queue entries", requeued);
        }

        let download_queue = Arc::new(WorkQueue::new(
            QueueKind::Download,
            config.queues.download.clone(),
            repo.clone(),
        ));
        let extraction_queue = Arc::new(WorkQueue::new(
            QueueKind::Extraction,
            config.queues.extraction.clone(),
            repo.clone(),
        ));
        let synthesis_queue = Arc::new(WorkQueue::new(
            QueueKind::Synthesis,
            config.queues.synthesis.clone(),
            repo.clone(),
        ));

        let download_pool = Arc::new(WorkerPool::new(
            QueueKind::Download,
            config.queues.download.concurrency,
        ));
        let extraction_pool = Arc::new(WorkerPool::new(
            QueueKind::Extraction,
            config.queues.extraction.concurrency,
        ));
        let synthesis_pool = Arc::new(WorkerPool::new(
            QueueKind::Synthesis,
            config.queues.synthesis.concurrency,
        ));

        let job_store = Arc::new(JobStore::new(config.max_tracked_jobs));
        let download_manager = Arc::new(DownloadManager::new(
            download_queue.clone(),
            config.storage.download_dir.clone(),
        ));

        let orchestrator = Arc::new(PipelineOrchestrator::new(
            job_store.clone(),
            download_manager.clone(),
            download_queue.clone(),
            extraction_queue.clone(),
            synthesis_queue.clone(),
            providers.clone(),
            config.providers.clone(),
        ));

        info!("Service container initialized");

        Ok(Self {
            pool,
            job_store,
            download_queue,
            extraction_queue,
            synthesis_queue,
            download_pool,
            extraction_pool,
            synthesis_pool,
            download_manager,
            orchestrator,
            providers,
            config,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Start worker pools and background maintenance.
    pub fn start(&self) {
        self.download_pool.start(
            self.download_queue.clone(),
            Arc::new(DownloadExecutor::new(
                self.providers.download.clone(),
                self.config.storage.download_dir.clone(),
            )),
            self.job_store.clone(),
        );
        self.extraction_pool.start(
            self.extraction_queue.clone(),
            Arc::new(ExtractionExecutor::new(self.providers.extraction.clone())),
            self.job_store.clone(),
        );
        self.synthesis_pool.start(
            self.synthesis_queue.clone(),
            Arc::new(SynthesisExecutor::new(self.providers.speech.clone())),
            self.job_store.clone(),
        );

        self.spawn_retention_sweeper();
        info!("Worker pools started");
    }

    /// Periodically evict terminal queue entries beyond retention limits.
    fn spawn_retention_sweeper(&self) {
        let queues = [
            self.download_queue.clone(),
            self.extraction_queue.clone(),
            self.synthesis_queue.clone(),
        ];
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(RETENTION_SWEEP_INTERVAL) => {}
                }
                for queue in &queues {
                    match queue.enforce_retention().await {
                        Ok(0) => {}
                        Ok(removed) => {
                            info!("Retention sweep removed {} {} entries", removed, queue.kind())
                        }
                        Err(e) => warn!("Retention sweep failed for {}: {}", queue.kind(), e),
                    }
                }
            }
        });
    }

    /// Build the API state backed by this container.
    pub fn app_state(&self) -> AppState {
        AppState {
            start_time: std::time::Instant::now(),
            orchestrator: self.orchestrator.clone(),
            download_manager: self.download_manager.clone(),
            queues: vec![
                self.download_queue.clone(),
                self.extraction_queue.clone(),
                self.synthesis_queue.clone(),
            ],
            queue_repository: self.download_queue.repository(),
            db_pool: self.pool.clone(),
            audio_dir: self.config.storage.audio_dir.clone(),
        }
    }

    /// Stop background work: running job tasks, then worker pools.
    pub async fn shutdown(&self) {
        info!("Shutting down services");
        self.cancellation_token.cancel();
        self.orchestrator.shutdown();

        self.download_pool.stop().await;
        self.extraction_pool.stop().await;
        self.synthesis_pool.stop().await;

        info!("Services stopped");
    }
}

/// Wire HTTP collaborator implementations from configuration.
pub fn build_http_providers(config: &AppConfig) -> Result<Providers> {
    let p = &config.providers;

    let metadata_client = client_with_timeout(p.metadata_timeout)?;
    let download_client = client_with_timeout(p.download_timeout)?;
    let extraction_client = client_with_timeout(p.extraction_timeout)?;
    let summarize_client = client_with_timeout(p.summarize_timeout)?;
    let tts_client = client_with_timeout(p.synthesis_timeout)?;

    Ok(Providers {
        search: Arc::new(HttpSearchProvider::new(
            metadata_client,
            p.search_base_url.clone(),
        )),
        download: Arc::new(HttpDownloadTransport::new(download_client)),
        extraction: Arc::new(HttpExtractionService::new(
            extraction_client,
            p.extraction_base_url.clone(),
        )),
        summarizer: Arc::new(HttpSummarizationService::new(
            summarize_client,
            p.summarizer_base_url.clone(),
        )),
        speech: Arc::new(HttpSpeechService::new(tts_client, p.tts_base_url.clone())),
    })
}

fn client_with_timeout(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))
}
