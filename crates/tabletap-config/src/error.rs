use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({message})")]
    InvalidValue {
        var: String,
        value: String,
        message: String,
    },

    #[error("validation failed: {0}")]
    Validation(String),
}

impl ConfigError {
    /// Create a new InvalidValue error.
    pub fn invalid_value(
        var: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            var: var.into(),
            value: value.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
