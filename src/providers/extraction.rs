//! Text-extraction service interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One chapter of extracted text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedChapter {
    pub chapter_number: u32,
    pub title: String,
    pub text: String,
}

/// Extraction service contract.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Extract ordered chapter text from a downloaded book file.
    async fn extract(&self, file_path: &str) -> Result<Vec<ExtractedChapter>>;
}

/// HTTP implementation of the extraction service.
pub struct HttpExtractionService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExtractionService {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    chapters: Vec<ExtractedChapter>,
}

#[async_trait]
impl ExtractionService for HttpExtractionService {
    async fn extract(&self, file_path: &str) -> Result<Vec<ExtractedChapter>> {
        let response = self
            .client
            .post(format!("{}/extract", self.base_url))
            .json(&serde_json::json!({ "file_path": file_path }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::extraction(format!("extract {}: {}", file_path, e)))?;
        let body: ExtractResponse = response.json().await?;
        Ok(body.chapters)
    }
}
