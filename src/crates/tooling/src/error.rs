//! Errors a [`crate::tool::Tool`] implementation or the [`crate::registry::ToolRegistry`] can return.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolingError>;

#[derive(Debug, Error)]
pub enum ToolingError {
    #[error("tool '{0}' is not registered")]
    NotFound(String),

    #[error("tool '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("arguments for tool '{tool}' failed validation: {error}")]
    InvalidArguments { tool: String, error: String },

    #[error("tool '{0}' execution failed: {1}")]
    ExecutionFailed(String, String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
