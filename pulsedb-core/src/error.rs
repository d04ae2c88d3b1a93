//! Error types for PulseDB

use thiserror::Error;

/// Result type alias for PulseDB operations
pub type Result<T> = std::result::Result<T, PulseError>;

/// PulseDB error types
#[derive(Error, Debug)]
pub enum PulseError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Key is empty or otherwise unusable
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// Request failed validation before touching any state
    #[error("{0}")]
    InvalidInput(String),
}

impl PulseError {
    /// Check if the error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, PulseError::Io(_))
    }
}
