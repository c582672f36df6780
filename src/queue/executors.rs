//! Executors binding each queue to its external collaborator.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::database::models::QueueKind;
use crate::providers::{DownloadTransport, ExtractionService, SpeechService, SynthesisRequest};
use crate::queue::payload::{WorkOutput, WorkPayload};
use crate::queue::worker::WorkExecutor;
use crate::{Error, Result};

/// Executes download entries by streaming the remote file to local storage.
pub struct DownloadExecutor {
    transport: Arc<dyn DownloadTransport>,
    download_dir: PathBuf,
}

impl DownloadExecutor {
    pub fn new(transport: Arc<dyn DownloadTransport>, download_dir: PathBuf) -> Self {
        Self {
            transport,
            download_dir,
        }
    }
}

#[async_trait]
impl WorkExecutor for DownloadExecutor {
    fn queue_kind(&self) -> QueueKind {
        QueueKind::Download
    }

    async fn execute(&self, payload: &WorkPayload) -> Result<WorkOutput> {
        let WorkPayload::Download { url, .. } = payload else {
            return Err(Error::Other("download executor got non-download payload".into()));
        };
        let file = self.transport.fetch(url, &self.download_dir).await?;
        Ok(WorkOutput::Downloaded {
            file_path: file.path.to_string_lossy().into_owned(),
            size_bytes: file.size_bytes,
        })
    }
}

/// Executes extraction entries against the text-extraction service.
pub struct ExtractionExecutor {
    service: Arc<dyn ExtractionService>,
}

impl ExtractionExecutor {
    pub fn new(service: Arc<dyn ExtractionService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl WorkExecutor for ExtractionExecutor {
    fn queue_kind(&self) -> QueueKind {
        QueueKind::Extraction
    }

    async fn execute(&self, payload: &WorkPayload) -> Result<WorkOutput> {
        let WorkPayload::Extract { file_path, .. } = payload else {
            return Err(Error::Other("extraction executor got non-extract payload".into()));
        };
        let chapters = self.service.extract(file_path).await?;
        if chapters.is_empty() {
            return Err(Error::extraction("no chapters extracted"));
        }
        Ok(WorkOutput::Extracted { chapters })
    }
}

/// Executes synthesis entries against the speech-synthesis service.
pub struct SynthesisExecutor {
    service: Arc<dyn SpeechService>,
}

impl SynthesisExecutor {
    pub fn new(service: Arc<dyn SpeechService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl WorkExecutor for SynthesisExecutor {
    fn queue_kind(&self) -> QueueKind {
        QueueKind::Synthesis
    }

    async fn execute(&self, payload: &WorkPayload) -> Result<WorkOutput> {
        let WorkPayload::Synthesize {
            text,
            voice,
            speed,
            book_id,
            chapter_index,
            ..
        } = payload
        else {
            return Err(Error::Other("synthesis executor got non-synthesize payload".into()));
        };
        let audio = self
            .service
            .synthesize(&SynthesisRequest {
                text: text.clone(),
                voice: voice.clone(),
                speed: *speed,
                book_id: book_id.clone(),
                chapter_id: chapter_index.to_string(),
            })
            .await?;
        Ok(WorkOutput::Synthesized {
            audio_path: audio.audio_path,
            duration_secs: audio.duration_secs,
            size_bytes: audio.size_bytes,
        })
    }
}
