use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Heartbeat timed out after {0:?}")]
    HeartbeatTimeout(std::time::Duration),

    #[error("Decode error: {context}")]
    Decode { context: String },

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Decode failures are dropped per-event; they never tear down a channel or bus.
    #[must_use]
    pub fn decode(context: impl Into<String>) -> Self {
        Self::Decode {
            context: context.into(),
        }
    }

    /// Whether this error class is resolved by retrying with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::HeartbeatTimeout(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidInput(format!("invalid URL: {err}"))
    }
}
