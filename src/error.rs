//! Crate-wide error type.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Content generator error: {0}")]
    Generator(String),

    /// Provider-side quota or rate limit. Expected to clear on its own.
    #[error("Rate limited by {provider}: {message}")]
    RateLimited { provider: String, message: String },

    #[error("No ideas generated for topic '{0}'")]
    NoIdeas(String),

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("Thumbnail generation failed: {0}")]
    Thumbnail(String),

    #[error("Video assembly error: {0}")]
    Assembly(String),

    #[error("{stage} worker failed: {message}")]
    Worker {
        stage: String,
        message: String,
        trace: String,
    },

    #[error("{stage} exceeded timeout of {}s", timeout.as_secs())]
    StageTimeout { stage: String, timeout: Duration },

    #[error("Upload failed: {0}")]
    Publish(String),

    #[error("Upload returned no video ID")]
    EmptyVideoId,

    #[error("Pipeline panicked: {0}")]
    Panic(String),

    #[error("Command `{program}` failed: {message}")]
    Command { program: String, message: String },
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn generator(msg: impl Into<String>) -> Self {
        Self::Generator(msg.into())
    }

    pub fn rate_limited(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RateLimited {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn command(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            program: program.into(),
            message: message.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }

    /// Timeouts point at deployment tuning rather than a logic bug.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::StageTimeout { .. })
    }

    /// Captured worker trace, when the failure came from a handed-off stage.
    pub fn trace(&self) -> Option<&str> {
        match self {
            Error::Worker { trace, .. } => Some(trace),
            _ => None,
        }
    }
}
