//! Error types for graph construction, validation, and execution.
//!
//! All variants implement `std::error::Error` via `thiserror`. `RuntimeError`
//! in the `agent-runtime` crate wraps [`GraphError`] with `#[from]`, the same
//! way this crate wraps [`runtime_trace::error::TraceError`].

use crate::node::NodeId;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised while building, validating, or executing a [`crate::graph::Graph`].
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph validation failed: {0}")]
    Validation(String),

    #[error("node '{node}' references unknown target '{target}'")]
    UnknownTarget { node: NodeId, target: NodeId },

    #[error("graph has no entry point")]
    MissingEntry,

    #[error("cycle detected through node '{node}' with no finite visit budget")]
    UnboundedCycle { node: NodeId },

    #[error("node '{node}' execution failed: {error}")]
    NodeExecution { node: NodeId, error: String },

    #[error("node '{node}' exceeded retry budget after {attempts} attempts: {error}")]
    RetriesExhausted {
        node: NodeId,
        attempts: usize,
        error: String,
    },

    #[error("edge condition evaluation failed at node '{node}': {error}")]
    ConditionEvaluation { node: NodeId, error: String },

    #[error("shared-state error: {0}")]
    State(#[from] crate::scope::ScopeError),

    #[error("node '{node}' requested pause: {reason}")]
    Paused { node: NodeId, reason: String },

    #[error("pause error: {0}")]
    Pause(#[from] crate::pause::PauseError),

    #[error("trace error: {0}")]
    Trace(#[from] runtime_trace::error::TraceError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("{0}")]
    Custom(String),
}

impl GraphError {
    pub fn node_execution(node: impl Into<NodeId>, error: impl std::fmt::Display) -> Self {
        GraphError::NodeExecution {
            node: node.into(),
            error: error.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        GraphError::Validation(msg.into())
    }
}

/// The structured terminal-failure taxonomy a graph execution can end in.
/// Every tag here has a matching `DecisionOutcome::Failure { kind, .. }` in
/// `runtime-trace` so a trace reader can filter by category without parsing
/// the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InputMissing,
    ValidationFailed,
    FunctionError,
    LlmError,
    ToolError,
    ScopeViolation,
    NoEdgeMatched,
    VisitBudgetExceeded,
    PauseTimeout,
    Cancelled,
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::InputMissing => "input_missing",
            FailureKind::ValidationFailed => "validation_failed",
            FailureKind::FunctionError => "function_error",
            FailureKind::LlmError => "llm_error",
            FailureKind::ToolError => "tool_error",
            FailureKind::ScopeViolation => "scope_violation",
            FailureKind::NoEdgeMatched => "no_edge_matched",
            FailureKind::VisitBudgetExceeded => "visit_budget_exceeded",
            FailureKind::PauseTimeout => "pause_timeout",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

/// A terminal execution failure, structured rather than a bare error string
/// — the payload `ExecutionRecord::error` in `agent-runtime` stores directly.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
    pub node_id: Option<NodeId>,
    pub attempt: usize,
}

impl ExecutionFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>, node_id: Option<NodeId>, attempt: usize) -> Self {
        Self { kind, message: message.into(), node_id, attempt }
    }
}
