//! Errors a [`crate::model::ChatModel`] implementation can return.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Provider(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Unavailable(_) | LlmError::Timeout(_) | LlmError::RateLimited(_)
        )
    }
}
