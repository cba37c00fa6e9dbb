use thiserror::Error;

/// Errors surfaced by the realtime layer's Redis services.
///
/// Only operations whose callers need write confirmation return these;
/// read and delete paths degrade to a miss and log instead.
#[derive(Debug, Error)]
pub enum RedisServiceError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RedisServiceError {
    /// Create a new Connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }
}

/// Result type alias for realtime layer operations.
pub type Result<T> = std::result::Result<T, RedisServiceError>;
