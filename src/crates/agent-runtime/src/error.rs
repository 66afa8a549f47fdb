//! Errors for the execution stream, event bus, and runtime composition root.
//! Wraps the two lower-layer error types with `#[from]`, the same pattern
//! `runtime_graph::GraphError` uses for `runtime_trace::TraceError`.

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("graph error: {0}")]
    Graph(#[from] runtime_graph::GraphError),

    #[error("trace error: {0}")]
    Trace(#[from] runtime_trace::TraceError),

    #[error("stream '{0}' not found")]
    StreamNotFound(String),

    #[error("execution '{0}' not found")]
    ExecutionNotFound(Uuid),

    #[error("stream '{0}' is at capacity ({1} concurrent executions)")]
    AtCapacity(String, usize),

    #[error("runtime is shutting down, no new executions are admitted")]
    ShuttingDown,

    #[error("shutdown deadline elapsed with {0} executions still running")]
    ShutdownDeadlineExceeded(usize),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("trigger payload for '{0}' is missing required input '{1}'")]
    InvalidInput(String, String),

    #[error("execution '{0}' is not paused")]
    NotPaused(Uuid),

    #[error("pause for execution '{0}' was already resumed")]
    AlreadyResumed(Uuid),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}
