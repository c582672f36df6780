//! Search/scrape provider interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookHit {
    pub title: String,
    pub author: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// A candidate download location for a book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLink {
    pub url: String,
    /// Mirror/source name (e.g. "ipfs", "partner-server").
    pub source: String,
}

/// Detail lookup result for a catalog URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookDetails {
    pub title: String,
    pub author: String,
    pub download_links: Vec<DownloadLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Metadata derived from a non-catalog direct link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkAnalysis {
    pub title: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Search provider contract.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Search the catalog for books matching a query.
    async fn search(&self, query: &str, limit: u32, formats: &[String]) -> Result<Vec<BookHit>>;

    /// Resolve a catalog URL to full book details including mirrors.
    async fn get_details(&self, url: &str) -> Result<BookDetails>;

    /// Derive metadata for a direct link outside the catalog.
    async fn analyze_link(&self, url: &str) -> Result<LinkAnalysis>;
}

/// Pick the preferred download link among multiple mirrors.
///
/// Prefers the designated primary source, falling back to the first
/// available.
pub fn preferred_download_link<'a>(
    links: &'a [DownloadLink],
    primary_source: &str,
) -> Option<&'a DownloadLink> {
    links
        .iter()
        .find(|l| l.source.eq_ignore_ascii_case(primary_source))
        .or_else(|| links.first())
}

/// HTTP implementation of the search provider.
pub struct HttpSearchProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSearchProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str, limit: u32, formats: &[String]) -> Result<Vec<BookHit>> {
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[
                ("q", query.to_string()),
                ("limit", limit.to_string()),
                ("formats", formats.join(",")),
            ])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::service_unavailable(format!("search provider: {}", e)))?;
        Ok(response.json().await?)
    }

    async fn get_details(&self, url: &str) -> Result<BookDetails> {
        let response = self
            .client
            .get(format!("{}/details", self.base_url))
            .query(&[("url", url)])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::service_unavailable(format!("search provider: {}", e)))?;
        Ok(response.json().await?)
    }

    async fn analyze_link(&self, url: &str) -> Result<LinkAnalysis> {
        let response = self
            .client
            .post(format!("{}/analyze", self.base_url))
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::service_unavailable(format!("link analyzer: {}", e)))?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links() -> Vec<DownloadLink> {
        vec![
            DownloadLink {
                url: "https://mirror-a.example/1".to_string(),
                source: "partner-server".to_string(),
            },
            DownloadLink {
                url: "https://mirror-b.example/1".to_string(),
                source: "ipfs".to_string(),
            },
        ]
    }

    #[test]
    fn test_preferred_link_picks_primary_source() {
        let links = links();
        let chosen = preferred_download_link(&links, "ipfs").unwrap();
        assert_eq!(chosen.url, "https://mirror-b.example/1");
    }

    #[test]
    fn test_preferred_link_falls_back_to_first() {
        let links = links();
        let chosen = preferred_download_link(&links, "libgen").unwrap();
        assert_eq!(chosen.url, "https://mirror-a.example/1");
    }

    #[test]
    fn test_preferred_link_empty() {
        assert!(preferred_download_link(&[], "ipfs").is_none());
    }
}
