//! Speech-synthesis service interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One synthesis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    /// Speaker id (e.g. "9017" female, "8051" male).
    pub voice: String,
    /// Speech speed multiplier.
    pub speed: f32,
    pub book_id: String,
    pub chapter_id: String,
}

/// Output of one synthesis call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizedAudio {
    pub audio_path: String,
    pub duration_secs: f64,
    pub size_bytes: u64,
}

/// Speech-synthesis service contract.
#[async_trait]
pub trait SpeechService: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio>;
}

/// HTTP implementation of the speech service.
pub struct HttpSpeechService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSpeechService {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TtsResponse {
    success: bool,
    message: Option<String>,
    audio_path: Option<String>,
    duration: Option<f64>,
    file_size: Option<u64>,
}

#[async_trait]
impl SpeechService for HttpSpeechService {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAudio> {
        let response = self
            .client
            .post(format!("{}/generate-tts", self.base_url))
            .json(&serde_json::json!({
                "text": request.text,
                "book": request.book_id,
                "chapter": request.chapter_id,
                "speaker": request.voice,
                "speed": request.speed,
            }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::synthesis(format!("tts service: {}", e)))?;

        let body: TtsResponse = response.json().await?;
        if !body.success {
            return Err(Error::synthesis(
                body.message.unwrap_or_else(|| "synthesis rejected".to_string()),
            ));
        }

        Ok(SynthesizedAudio {
            audio_path: body
                .audio_path
                .ok_or_else(|| Error::synthesis("response missing audio_path"))?,
            duration_secs: body.duration.unwrap_or(0.0),
            size_bytes: body.file_size.unwrap_or(0),
        })
    }
}
