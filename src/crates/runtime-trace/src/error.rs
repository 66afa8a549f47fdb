//! Error types for trace storage operations.

use thiserror::Error;

/// Result type for trace storage operations.
pub type Result<T> = std::result::Result<T, TraceError>;

/// Errors that can occur while recording or retrieving execution traces.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("trace not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid trace: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Custom(String),
}
