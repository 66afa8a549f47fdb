//! `Tool`: the trait a `Subagent`/`Function` node's handler dispatches to
//! when it needs to call out to an external tool server. Grounded on the
//! teacher's tool-execution surface (`runtime/mod.rs`'s request/response
//! pair), narrowed to a provider-agnostic trait instead of a TOON-aware
//! message layer — this crate ships no concrete tool, only the seam.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self { id: id.into(), name: name.into(), arguments }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallResult {
    pub fn success(call_id: impl Into<String>, output: Value) -> Self {
        Self { call_id: call_id.into(), output: Some(output), error: None }
    }

    pub fn failure(call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self { call_id: call_id.into(), output: None, error: Some(error.into()) }
    }

    pub fn is_success(&self) -> bool {
        self.output.is_some()
    }
}

/// One callable tool. Implementations describe their own JSON Schema
/// parameters and execute synchronously-from-the-caller's-perspective,
/// returning a [`ToolCallResult`] rather than propagating errors through
/// `Result`'s `Err` arm — a failed tool call is still a normal outcome a
/// `Llm` node's next turn needs to see.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for this tool's arguments, or `None` if it takes none.
    fn parameters(&self) -> Option<Value> {
        None
    }

    async fn call(&self, call: ToolCall) -> Result<ToolCallResult>;
}
