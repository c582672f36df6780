//! External collaborator interfaces.
//!
//! Each collaborator is consumed through a narrow async trait so the pipeline
//! can be exercised with stub implementations in tests. The HTTP
//! implementations carry bounded per-call timeouts; a timeout is treated
//! identically to a call failure.

mod download;
mod extraction;
mod search;
mod summarize;
mod tts;

pub use download::{DownloadTransport, DownloadedFile, HttpDownloadTransport};
pub use extraction::{ExtractedChapter, ExtractionService, HttpExtractionService};
pub use search::{
    BookDetails, BookHit, DownloadLink, HttpSearchProvider, LinkAnalysis, SearchProvider,
    preferred_download_link,
};
pub use summarize::{HttpSummarizationService, SummarizationService, Summary};
pub use tts::{HttpSpeechService, SpeechService, SynthesisRequest, SynthesizedAudio};

use std::sync::Arc;

/// Bundle of all collaborator handles used by the pipeline.
#[derive(Clone)]
pub struct Providers {
    pub search: Arc<dyn SearchProvider>,
    pub download: Arc<dyn DownloadTransport>,
    pub extraction: Arc<dyn ExtractionService>,
    pub summarizer: Arc<dyn SummarizationService>,
    pub speech: Arc<dyn SpeechService>,
}
