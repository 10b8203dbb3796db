//! Engine adapter errors

use thiserror::Error;

use crate::retry::Retryable;

/// Errors talking to the engine or the topic administration endpoint
#[derive(Debug, Error)]
pub enum KsqlError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Topic administration error: {0}")]
    TopicAdmin(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for KsqlError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            KsqlError::Decode(err.to_string())
        } else {
            KsqlError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for KsqlError {
    fn from(err: serde_json::Error) -> Self {
        KsqlError::Decode(err.to_string())
    }
}

impl Retryable for KsqlError {
    fn is_retryable(&self) -> bool {
        match self {
            KsqlError::Transport(_) => true,
            KsqlError::Http { status, .. } => *status == 429 || *status >= 500,
            KsqlError::Decode(_) | KsqlError::TopicAdmin(_) | KsqlError::Config(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, KsqlError>;
