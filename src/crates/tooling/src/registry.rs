//! `ToolRegistry`: looks a [`crate::tool::Tool`] up by name and dispatches a
//! call to it. Grounded on `runtime_graph::node::NodeRegistry`'s kind-keyed
//! `DashMap`-free `HashMap` of trait objects, the same registration shape
//! applied to tools instead of node kinds.

use crate::error::{Result, ToolingError};
use crate::tool::{Tool, ToolCall, ToolCallResult};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolingError::AlreadyRegistered(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolingError::NotFound(name.to_string()))
    }

    /// Dispatch `call` to its named tool, surfacing a missing-tool error as
    /// a failed [`ToolCallResult`] rather than an `Err` — the caller (an LLM
    /// node's next turn) treats both the same way.
    pub async fn dispatch(&self, call: ToolCall) -> ToolCallResult {
        match self.get(&call.name) {
            Ok(tool) => {
                let call_id = call.id.clone();
                tool.call(call).await.unwrap_or_else(|error| ToolCallResult::failure(call_id, error.to_string()))
            }
            Err(error) => ToolCallResult::failure(call.id, error.to_string()),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "returns its input unchanged"
        }

        async fn call(&self, call: ToolCall) -> Result<ToolCallResult> {
            Ok(ToolCallResult::success(call.id, call.arguments))
        }
    }

    #[tokio::test]
    async fn dispatches_to_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo)).unwrap();

        let result = registry.dispatch(ToolCall::new("1", "echo", json!({"x": 1}))).await;
        assert!(result.is_success());
        assert_eq!(result.output, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn missing_tool_dispatches_as_failure_not_error() {
        let registry = ToolRegistry::new();
        let result = registry.dispatch(ToolCall::new("1", "missing", json!(null))).await;
        assert!(!result.is_success());
        assert!(result.error.unwrap().contains("missing"));
    }

    #[test]
    fn rejects_duplicate_registration() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo)).unwrap();
        assert!(matches!(registry.register(Arc::new(Echo)), Err(ToolingError::AlreadyRegistered(_))));
    }
}
