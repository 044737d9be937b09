//! Crate-level error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Submitted text was blank after trimming.
    #[error("empty input")]
    EmptyInput,

    /// The session hit the turn limit and refuses further submissions.
    #[error("session locked after reaching the turn limit")]
    SessionLocked,

    /// A cycle is already streaming.
    #[error("a response is already streaming")]
    Busy,

    /// The requested backend is unknown or has no transport registered.
    #[error("unsupported backend: {0}")]
    UnsupportedBackend(String),

    /// Network failure, non-success HTTP status, malformed chunk or provider error.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::TransportFailure(e.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::TransportFailure(format!("malformed chunk: {}", e))
    }
}

impl From<toml::de::Error> for ChatError {
    fn from(e: toml::de::Error) -> Self {
        ChatError::Config(e.to_string())
    }
}
