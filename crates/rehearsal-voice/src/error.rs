//! Error types for the voice layer

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while synthesizing, recognizing or playing speech.
///
/// None of these reach the trainee: the sequencer logs and skips playback,
/// and recognition failures turn into "no input".
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
