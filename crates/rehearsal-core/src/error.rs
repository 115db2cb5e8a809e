use thiserror::Error;

/// Failures inside a completion provider. None of these escape the driver:
/// they are logged and turned into the fallback fragment.
#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("Completion provider not configured: {0}")]
    Config(String),

    #[error("Completion request failed: {0}")]
    Request(String),

    #[error("Completion API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Completion stream broke: {0}")]
    Stream(String),

    #[error("Completion provider reported an error: {0}")]
    Provider(String),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to render settings: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Errors surfaced by the session orchestrator to the presentation boundary.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Trigger phrases failed to compile: {0}")]
    Triggers(#[from] regex::Error),

    #[error("Input is {len} characters long; the limit is {max}")]
    InputTooLong { len: usize, max: usize },

    #[error("Transcript export failed: {0}")]
    Export(#[from] std::io::Error),
}

pub type SessionResult<T> = Result<T, SessionError>;
