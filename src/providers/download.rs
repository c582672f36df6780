//! Download transport interface.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::{Error, Result};

/// A file fetched to local storage.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Download transport contract. Implementations must stream to disk rather
/// than buffering whole files in memory.
#[async_trait]
pub trait DownloadTransport: Send + Sync {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<DownloadedFile>;
}

/// HTTP implementation streaming response bodies to the download directory.
pub struct HttpDownloadTransport {
    client: reqwest::Client,
}

impl HttpDownloadTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn file_name_for(url: &str) -> String {
        let name = url
            .rsplit('/')
            .next()
            .map(|s| s.split(['?', '#']).next().unwrap_or(s))
            .filter(|s| !s.is_empty())
            .unwrap_or("download");
        // Unique prefix: the same file name can come from different sources.
        format!("{}-{}", &uuid::Uuid::new_v4().to_string()[..8], name)
    }
}

#[async_trait]
impl DownloadTransport for HttpDownloadTransport {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<DownloadedFile> {
        tokio::fs::create_dir_all(dest_dir).await?;

        let response = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::download(format!("fetch {}: {}", url, e)))?;

        let path = dest_dir.join(Self::file_name_for(url));
        let mut file = tokio::fs::File::create(&path).await?;
        let mut stream = response.bytes_stream();
        let mut size_bytes = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::download(format!("stream {}: {}", url, e)))?;
            size_bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if size_bytes == 0 {
            // Partial zero-byte files only confuse extraction later.
            let _ = tokio::fs::remove_file(&path).await;
            return Err(Error::download(format!("empty response from {}", url)));
        }

        info!(url = %url, path = %path.display(), size_bytes, "Download complete");
        debug!("Stored download under {}", dest_dir.display());

        Ok(DownloadedFile { path, size_bytes })
    }
}
