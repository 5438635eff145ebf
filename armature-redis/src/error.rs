//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised while talking to the backing key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The store rejected or could not execute a command.
    #[error("Command error: {0}")]
    Command(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout error.
    #[error("Operation timed out")]
    Timeout,

    /// No script is loaded under the given handle.
    #[error("No script loaded for handle {0}")]
    NoScript(String),

    /// Underlying Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StoreError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout => true,
            Self::Redis(err) => err.is_timeout() || err.is_connection_dropped(),
            _ => false,
        }
    }

    /// Check if this error indicates connection loss.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Redis(err) => err.is_connection_refusal() || err.is_connection_dropped(),
            _ => false,
        }
    }
}
