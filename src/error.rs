//! Error types for the Tiergate service.

use thiserror::Error;

/// Main error type for Tiergate operations.
#[derive(Error, Debug)]
pub enum TiergateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Window store errors
    #[error("Window store error: {0}")]
    Store(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TiergateError {
    fn from(err: config::ConfigError) -> Self {
        TiergateError::Config(err.to_string())
    }
}

/// Result type alias for Tiergate operations.
pub type Result<T> = std::result::Result<T, TiergateError>;
