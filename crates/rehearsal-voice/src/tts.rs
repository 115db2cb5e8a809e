//! Speech synthesis for persona lines.
//!
//! Every persona has its own voice id, so the voice travels with each request.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Audio for `text` spoken with `voice`. An empty buffer means "nothing to play".
    async fn synthesize(&self, text: &str, voice: &str) -> VoiceResult<Vec<u8>>;
}

/// Produces no audio. Offline runs and `--mute` use it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentTts;

#[async_trait]
impl TtsBackend for SilentTts {
    async fn synthesize(&self, _text: &str, _voice: &str) -> VoiceResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// `POST {base}/audio/speech` on an OpenAI-compatible server.
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    endpoint: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
}

impl OpenAiTts {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        let base_url = base_url.into();
        let http = reqwest::Client::builder()
            .timeout(SYNTHESIS_TIMEOUT)
            .build()
            .map_err(|e| VoiceError::Tts(format!("client setup failed: {}", e)))?;
        Ok(Self {
            endpoint: format!("{}/audio/speech", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
            http,
        })
    }
}

#[async_trait]
impl TtsBackend for OpenAiTts {
    async fn synthesize(&self, text: &str, voice: &str) -> VoiceResult<Vec<u8>> {
        let line = text.trim();
        if line.is_empty() {
            return Ok(Vec::new());
        }
        debug!(voice, chars = line.len(), "requesting speech");

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "voice": voice, "input": line }))
            .send()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!("{} from speech endpoint: {}", status, detail)));
        }
        let audio = response.bytes().await.map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(audio.to_vec())
    }
}
