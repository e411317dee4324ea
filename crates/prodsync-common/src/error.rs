//! Error types shared across prodsync crates

use thiserror::Error;

/// Result type alias for prodsync operations
pub type Result<T> = std::result::Result<T, ProdsyncError>;

/// Errors that are not tied to a particular store or pipeline stage
#[derive(Error, Debug)]
pub enum ProdsyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl ProdsyncError {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        ProdsyncError::Config(msg.into())
    }
}
