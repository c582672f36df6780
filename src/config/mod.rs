//! Service configuration.
//!
//! All configuration is environment-driven with sensible defaults, so the
//! service starts with zero required settings. Each section exposes a
//! `from_env_or_default` constructor; `AppConfig::from_env` assembles them.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::QueueKind;

/// Default database URL (SQLite file in the working directory).
pub const DEFAULT_DATABASE_URL: &str = "sqlite:bookforge.db?mode=rwc";

fn env_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Request body size limit in bytes
    pub body_limit: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 7070,
            enable_cors: true,
            body_limit: 2 * 1024 * 1024, // 2MB
        }
    }
}

impl ApiServerConfig {
    /// Load API server config from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `API_BIND_ADDRESS` (e.g. "0.0.0.0")
    /// - `API_PORT` (e.g. "7070")
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Some(bind_address) = env_string("API_BIND_ADDRESS") {
            config.bind_address = bind_address;
        }

        if let Some(port) = env_parse::<u16>("API_PORT") {
            config.port = port;
        }

        config
    }
}

/// On-disk storage locations.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory for downloaded book files.
    pub download_dir: PathBuf,
    /// Directory for generated audio, laid out as `{audio_dir}/{book_id}/chapter_{n}.mp3`.
    pub audio_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            audio_dir: PathBuf::from("./audio"),
        }
    }
}

impl StorageConfig {
    /// Supported env vars: `DOWNLOAD_DIR`, `AUDIO_DIR`.
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Some(dir) = env_string("DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("AUDIO_DIR") {
            config.audio_dir = PathBuf::from(dir);
        }

        config
    }
}

/// External collaborator endpoints and per-call timeouts.
///
/// Metadata lookups get short timeouts; synthesis gets the longest. A timeout
/// is treated identically to a call failure and feeds the retry path.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL of the search/scrape provider.
    pub search_base_url: String,
    /// Base URL of the text-extraction service.
    pub extraction_base_url: String,
    /// Base URL of the summarization service.
    pub summarizer_base_url: String,
    /// Base URL of the speech-synthesis service.
    pub tts_base_url: String,
    /// Domains resolved through the search provider's detail lookup instead
    /// of generic link analysis.
    pub archive_domains: Vec<String>,
    /// Preferred mirror source when a detail lookup returns several links.
    pub primary_download_source: String,
    /// Timeout for metadata lookups (search, details, link analysis).
    pub metadata_timeout: Duration,
    /// Timeout for a single file download.
    pub download_timeout: Duration,
    /// Timeout for text extraction of one book.
    pub extraction_timeout: Duration,
    /// Timeout for summarizing one chapter. Summarization is best-effort and
    /// never blocks a pipeline.
    pub summarize_timeout: Duration,
    /// Timeout for synthesizing one chapter.
    pub synthesis_timeout: Duration,
    /// Default speaker id forwarded to the synthesis service.
    pub default_voice: String,
    /// Default speech speed multiplier.
    pub default_speed: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            search_base_url: "http://localhost:8001".to_string(),
            extraction_base_url: "http://localhost:8002".to_string(),
            summarizer_base_url: "http://localhost:8003".to_string(),
            tts_base_url: "http://localhost:8004".to_string(),
            archive_domains: vec![
                "annas-archive.org".to_string(),
                "archive.org".to_string(),
            ],
            primary_download_source: "partner-server".to_string(),
            metadata_timeout: Duration::from_secs(15),
            download_timeout: Duration::from_secs(300),
            extraction_timeout: Duration::from_secs(120),
            summarize_timeout: Duration::from_secs(30),
            synthesis_timeout: Duration::from_secs(600),
            default_voice: "9017".to_string(),
            default_speed: 1.0,
        }
    }
}

impl ProviderConfig {
    /// Supported env vars: `SEARCH_BASE_URL`, `EXTRACTION_BASE_URL`,
    /// `SUMMARIZER_BASE_URL`, `TTS_BASE_URL`, `ARCHIVE_DOMAINS`
    /// (comma-separated), `TTS_DEFAULT_VOICE`.
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Some(url) = env_string("SEARCH_BASE_URL") {
            config.search_base_url = url;
        }
        if let Some(url) = env_string("EXTRACTION_BASE_URL") {
            config.extraction_base_url = url;
        }
        if let Some(url) = env_string("SUMMARIZER_BASE_URL") {
            config.summarizer_base_url = url;
        }
        if let Some(url) = env_string("TTS_BASE_URL") {
            config.tts_base_url = url;
        }
        if let Some(domains) = env_string("ARCHIVE_DOMAINS") {
            config.archive_domains = domains
                .split(',')
                .map(|d| d.trim().to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect();
        }
        if let Some(voice) = env_string("TTS_DEFAULT_VOICE") {
            config.default_voice = voice;
        }

        config
    }
}

/// Per-queue scheduling and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePolicy {
    /// Maximum concurrent workers for this queue.
    pub concurrency: usize,
    /// Maximum delivery attempts before an entry is marked failed.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_delay_ms: u64,
    /// Cap applied to the computed backoff delay.
    pub max_delay_ms: u64,
    /// Per-execution timeout for one attempt.
    pub attempt_timeout_secs: u64,
    /// How many completed entries to retain before evicting the oldest.
    pub remove_on_complete: u32,
    /// How many failed entries to retain before evicting the oldest.
    pub remove_on_fail: u32,
}

impl QueuePolicy {
    /// Default policy for a queue kind (concurrency and attempts per kind).
    pub fn for_kind(kind: QueueKind) -> Self {
        match kind {
            QueueKind::Download => Self {
                concurrency: 3,
                max_attempts: 6,
                base_delay_ms: 2_000,
                max_delay_ms: 120_000,
                attempt_timeout_secs: 300,
                remove_on_complete: 200,
                remove_on_fail: 500,
            },
            QueueKind::Extraction => Self {
                concurrency: 4,
                max_attempts: 4,
                base_delay_ms: 1_000,
                max_delay_ms: 60_000,
                attempt_timeout_secs: 150,
                remove_on_complete: 200,
                remove_on_fail: 500,
            },
            QueueKind::Synthesis => Self {
                concurrency: 2,
                max_attempts: 5,
                base_delay_ms: 3_000,
                max_delay_ms: 180_000,
                attempt_timeout_secs: 640,
                remove_on_complete: 1_000,
                remove_on_fail: 1_000,
            },
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// Policies for all three queues.
#[derive(Debug, Clone)]
pub struct QueuesConfig {
    pub download: QueuePolicy,
    pub extraction: QueuePolicy,
    pub synthesis: QueuePolicy,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            download: QueuePolicy::for_kind(QueueKind::Download),
            extraction: QueuePolicy::for_kind(QueueKind::Extraction),
            synthesis: QueuePolicy::for_kind(QueueKind::Synthesis),
        }
    }
}

impl QueuesConfig {
    /// Supported env vars: `DOWNLOAD_CONCURRENCY`, `EXTRACTION_CONCURRENCY`,
    /// `SYNTHESIS_CONCURRENCY`.
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_parse::<usize>("DOWNLOAD_CONCURRENCY") {
            config.download.concurrency = n.max(1);
        }
        if let Some(n) = env_parse::<usize>("EXTRACTION_CONCURRENCY") {
            config.extraction.concurrency = n.max(1);
        }
        if let Some(n) = env_parse::<usize>("SYNTHESIS_CONCURRENCY") {
            config.synthesis.concurrency = n.max(1);
        }

        config
    }

    pub fn policy(&self, kind: QueueKind) -> &QueuePolicy {
        match kind {
            QueueKind::Download => &self.download,
            QueueKind::Extraction => &self.extraction,
            QueueKind::Synthesis => &self.synthesis,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ApiServerConfig,
    pub database_url: String,
    pub storage: StorageConfig,
    pub providers: ProviderConfig,
    pub queues: QueuesConfig,
    /// How many finished jobs the in-memory progress store retains.
    pub max_tracked_jobs: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ApiServerConfig::default(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            storage: StorageConfig::default(),
            providers: ProviderConfig::default(),
            queues: QueuesConfig::default(),
            max_tracked_jobs: 100,
        }
    }
}

impl AppConfig {
    /// Assemble the full configuration from the environment.
    pub fn from_env() -> Self {
        Self {
            server: ApiServerConfig::from_env_or_default(),
            database_url: env_string("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            storage: StorageConfig::from_env_or_default(),
            providers: ProviderConfig::from_env_or_default(),
            queues: QueuesConfig::from_env_or_default(),
            max_tracked_jobs: env_parse::<usize>("MAX_TRACKED_JOBS").unwrap_or(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_queue_policies() {
        let queues = QueuesConfig::default();
        assert_eq!(queues.download.concurrency, 3);
        assert_eq!(queues.download.max_attempts, 6);
        assert_eq!(queues.extraction.concurrency, 4);
        assert_eq!(queues.extraction.max_attempts, 4);
        assert_eq!(queues.synthesis.concurrency, 2);
        assert_eq!(queues.synthesis.max_attempts, 5);
    }

    #[test]
    fn test_synthesis_timeout_is_longest() {
        let providers = ProviderConfig::default();
        assert!(providers.synthesis_timeout > providers.metadata_timeout);
        assert!(providers.synthesis_timeout > providers.download_timeout);
    }
}
