//! Transcription of trainee recordings.
//!
//! Capture happens elsewhere; this module only uploads finished audio. Call
//! [`recognize`] at the session boundary: failures and silence both come back
//! as `None`, which the session treats as "no input".

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const TRANSCRIPTION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RecordedAudio {
    pub bytes: Vec<u8>,
    /// Upload file name; the server infers the container from its extension.
    pub file_name: String,
    pub mime: String,
}

impl RecordedAudio {
    pub fn wav(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            file_name: "utterance.wav".to_string(),
            mime: "audio/wav".to_string(),
        }
    }

    pub async fn from_wav_file(path: &Path) -> VoiceResult<Self> {
        Ok(Self::wav(tokio::fs::read(path).await?))
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[async_trait]
pub trait SttBackend: Send + Sync {
    /// Text of one recording. Silence is an empty string, not an error.
    async fn transcribe(&self, audio: &RecordedAudio) -> VoiceResult<String>;
}

/// Returns a fixed transcript, or silence when none is set.
#[derive(Debug, Default, Clone)]
pub struct CannedStt {
    transcript: Option<String>,
}

impl CannedStt {
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn saying(transcript: impl Into<String>) -> Self {
        Self {
            transcript: Some(transcript.into()),
        }
    }
}

#[async_trait]
impl SttBackend for CannedStt {
    async fn transcribe(&self, _audio: &RecordedAudio) -> VoiceResult<String> {
        Ok(self.transcript.clone().unwrap_or_default())
    }
}

/// Multipart upload to `{base}/audio/transcriptions` (Whisper-style servers).
#[derive(Debug, Clone)]
pub struct OpenAiStt {
    endpoint: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
}

impl OpenAiStt {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> VoiceResult<Self> {
        let base_url = base_url.into();
        let http = reqwest::Client::builder()
            .timeout(TRANSCRIPTION_TIMEOUT)
            .build()
            .map_err(|e| VoiceError::Stt(format!("client setup failed: {}", e)))?;
        Ok(Self {
            endpoint: format!("{}/audio/transcriptions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
            http,
        })
    }

    fn form(&self, audio: &RecordedAudio) -> VoiceResult<Form> {
        let file = Part::bytes(audio.bytes.clone())
            .file_name(audio.file_name.clone())
            .mime_str(&audio.mime)
            .map_err(|e| VoiceError::Stt(format!("bad mime type {}: {}", audio.mime, e)))?;
        Ok(Form::new().text("model", self.model.clone()).part("file", file))
    }
}

#[async_trait]
impl SttBackend for OpenAiStt {
    async fn transcribe(&self, audio: &RecordedAudio) -> VoiceResult<String> {
        if audio.is_empty() {
            return Ok(String::new());
        }
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(self.form(audio)?)
            .send()
            .await
            .map_err(|e| VoiceError::Stt(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VoiceError::Stt(format!(
                "{} from transcription endpoint: {}",
                status, detail
            )));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| VoiceError::Stt(format!("unreadable transcription: {}", e)))?;
        Ok(payload["text"].as_str().unwrap_or_default().to_string())
    }
}

/// Transcribe a recording, folding every failure into `None`.
pub async fn recognize(backend: &dyn SttBackend, audio: &RecordedAudio) -> Option<String> {
    match backend.transcribe(audio).await {
        Ok(text) => {
            let text = text.trim();
            if text.is_empty() {
                debug!(bytes = audio.bytes.len(), "no speech in recording");
                None
            } else {
                Some(text.to_string())
            }
        }
        Err(e) => {
            warn!("Transcription failed: {}", e);
            None
        }
    }
}
