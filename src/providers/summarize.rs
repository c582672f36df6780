//! Summarization service interface.
//!
//! Summarization is best-effort: callers fall back to the original text on
//! any failure or timeout, so this collaborator can never block a pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A produced summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub summary: String,
    pub compression_ratio: f64,
}

/// Summarization service contract.
#[async_trait]
pub trait SummarizationService: Send + Sync {
    async fn summarize(
        &self,
        text: &str,
        style: &str,
        max_length: u32,
        content_type: &str,
    ) -> Result<Summary>;
}

/// HTTP implementation of the summarization service.
pub struct HttpSummarizationService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSummarizationService {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SummarizationService for HttpSummarizationService {
    async fn summarize(
        &self,
        text: &str,
        style: &str,
        max_length: u32,
        content_type: &str,
    ) -> Result<Summary> {
        let response = self
            .client
            .post(format!("{}/summarize", self.base_url))
            .json(&serde_json::json!({
                "text": text,
                "style": style,
                "max_length": max_length,
                "content_type": content_type,
            }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::service_unavailable(format!("summarizer: {}", e)))?;
        Ok(response.json().await?)
    }
}
