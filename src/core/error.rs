//! Error types for loading, transport, and configuration.

use thiserror::Error;

/// Errors reported by a transport for a single transfer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transfer was cancelled before it completed.
    #[error("transfer cancelled")]
    Cancelled,
    /// The data loader was invalidated and accepts no new transfers.
    #[error("data loader invalidated")]
    Invalidated,
    /// The server answered with a non-success status code.
    #[error("unexpected http status {0}")]
    Status(u16),
    /// The transfer exceeded its timeout.
    #[error("transfer timed out")]
    TimedOut,
    /// Connection or protocol level failure with context.
    #[error("network error: {0}")]
    Network(String),
}

/// Terminal failure delivered to image task completion handlers.
///
/// Failures are always delivered as data; nothing in the loader panics or returns them
/// synchronously from `resume`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The task (or its transfer) was cancelled before completion.
    #[error("image task was cancelled")]
    Cancelled,
    /// The transport failed to deliver the image data.
    #[error("transport failure: {0}")]
    Transport(#[source] TransportError),
    /// The received bytes could not be decoded into an image.
    #[error("failed to decode image data")]
    DecodingFailed,
    /// One of the processors failed to produce an image.
    #[error("failed to process image")]
    ProcessingFailed,
}

impl From<TransportError> for LoadError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => Self::Cancelled,
            other => Self::Transport(other),
        }
    }
}

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The configuration document could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// An environment variable holds a value that cannot be parsed.
    #[error("environment variable `{key}` has invalid value `{value}`")]
    Env {
        /// Variable name.
        key: String,
        /// Raw value that failed to parse.
        value: String,
    },
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
