//! Concrete [`crate::node::NodeHandler`] implementations, one per
//! [`crate::node::NodeKind`] label. Grounded on the teacher's closure-based
//! `NodeExecutor` (`graph.rs`'s `Arc<dyn Fn(...) -> NodeResult>` registry)
//! generalized into one struct per kind so each can hold the fields its
//! kind actually needs instead of erasing everything behind one closure
//! signature. `Llm` and `Subagent` depend on the external collaborator
//! traits from the `llm`/`tooling` crates, never a concrete provider.

use crate::node::{NodeContext, NodeHandler, NodeKind, NodeMetrics, NodeOutcome};
use async_trait::async_trait;
use llm::{ChatModel, ChatRequest, Message as LlmMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tooling::{ToolCall, ToolRegistry};
use uuid::Uuid;

/// Dispatches `Function` nodes to a named, pre-registered closure — the
/// same closure-per-name shape as the teacher's `NodeExecutor`, just typed
/// as `NodeOutcome` instead of a raw result enum.
#[derive(Default)]
pub struct FunctionNodeHandler {
    functions: HashMap<String, Arc<dyn Fn(&NodeContext) -> NodeOutcome + Send + Sync>>,
}

impl FunctionNodeHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&NodeContext) -> NodeOutcome + Send + Sync + 'static,
    ) {
        self.functions.insert(name.into(), Arc::new(f));
    }
}

#[async_trait]
impl NodeHandler for FunctionNodeHandler {
    async fn run(&self, ctx: &NodeContext) -> NodeOutcome {
        let NodeKind::Function { handler } = ctx.kind() else {
            return NodeOutcome::Failure {
                error: format!("FunctionNodeHandler invoked for non-function node '{}'", ctx.node_id),
                retryable: false,
            };
        };
        match self.functions.get(handler) {
            Some(f) => f(ctx),
            None => NodeOutcome::Failure {
                error: format!("no function registered for handler '{handler}'"),
                retryable: false,
            },
        }
    }
}

/// Dispatches `Llm` nodes to a [`ChatModel`], reading the prompt from the
/// `"prompt"` key in the node's inputs and writing the response text to
/// `"response"`.
pub struct LlmNodeHandler {
    model: Arc<dyn ChatModel>,
}

impl LlmNodeHandler {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl NodeHandler for LlmNodeHandler {
    async fn run(&self, ctx: &NodeContext) -> NodeOutcome {
        let NodeKind::Llm { model } = ctx.kind() else {
            return NodeOutcome::Failure {
                error: format!("LlmNodeHandler invoked for non-llm node '{}'", ctx.node_id),
                retryable: false,
            };
        };
        let prompt = ctx
            .reads
            .get("prompt")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let messages = match &ctx.feedback {
            Some(feedback) => vec![
                LlmMessage::human(prompt),
                LlmMessage::human(format!(
                    "Your previous response did not pass validation: {feedback}. Please correct it."
                )),
            ],
            None => vec![LlmMessage::human(prompt)],
        };
        let request = ChatRequest::new(messages);
        match self.model.chat(request).await {
            Ok(response) => {
                let mut writes = HashMap::new();
                writes.insert("response".to_string(), serde_json::json!(response.message.content));
                writes.insert("model".to_string(), serde_json::json!(model));
                let metrics = NodeMetrics {
                    tokens: response.usage.as_ref().map(|u| u.total_tokens),
                    reasoning: response.reasoning.as_ref().map(|r| r.content.clone()),
                    ..Default::default()
                };
                NodeOutcome::Success { writes, metrics }
            }
            Err(error) => NodeOutcome::Failure {
                error: error.to_string(),
                retryable: error.is_retryable(),
            },
        }
    }
}

/// Dispatches `Router` nodes: parses the node's `expression` field as a
/// JSON-encoded [`crate::expr::Condition`] and evaluates it against the
/// node's reads, writing the boolean result to `"route"` for downstream
/// conditional edges to consume. Never declares output keys of its own per
/// the graph invariant that router nodes carry no business-data outputs.
pub struct RouterNodeHandler;

#[async_trait]
impl NodeHandler for RouterNodeHandler {
    async fn run(&self, ctx: &NodeContext) -> NodeOutcome {
        let NodeKind::Router { expression } = ctx.kind() else {
            return NodeOutcome::Failure {
                error: format!("RouterNodeHandler invoked for non-router node '{}'", ctx.node_id),
                retryable: false,
            };
        };
        let condition: crate::expr::Condition = match serde_json::from_str(expression) {
            Ok(c) => c,
            Err(error) => {
                return NodeOutcome::Failure {
                    error: format!("invalid router expression: {error}"),
                    retryable: false,
                }
            }
        };
        match crate::expr::Evaluator::evaluate(&condition, &ctx.reads) {
            Ok(matched) => {
                let mut writes = HashMap::new();
                writes.insert("route".to_string(), serde_json::json!(matched));
                let metrics = NodeMetrics {
                    options: vec!["true".to_string(), "false".to_string()],
                    chosen: Some(matched.to_string()),
                    ..Default::default()
                };
                NodeOutcome::Success { writes, metrics }
            }
            Err(error) => NodeOutcome::Failure { error: error.to_string(), retryable: false },
        }
    }
}

/// Dispatches `Pause` nodes: always suspends, carrying the node's
/// configured message through to the pause registry. Fails closed if the
/// node has no pause policy — `Graph::validate` should have rejected such a
/// graph before execution ever reached this handler.
pub struct PauseNodeHandler;

#[async_trait]
impl NodeHandler for PauseNodeHandler {
    async fn run(&self, ctx: &NodeContext) -> NodeOutcome {
        if !matches!(ctx.kind(), NodeKind::Pause) {
            return NodeOutcome::Failure {
                error: format!("PauseNodeHandler invoked for non-pause node '{}'", ctx.node_id),
                retryable: false,
            };
        }
        match &ctx.node.pause {
            Some(policy) => NodeOutcome::Suspend { reason: policy.message.clone() },
            None => NodeOutcome::Failure {
                error: format!("pause node '{}' has no pause policy", ctx.node_id),
                retryable: false,
            },
        }
    }
}

/// Dispatches `Subagent` nodes to a registered [`tooling::Tool`] named after
/// the node's `graph` field — the delegation boundary spec.md draws around
/// "specific example agents" as an external collaborator, not a recursive
/// graph embedding this crate owns.
pub struct SubagentNodeHandler {
    tools: Arc<ToolRegistry>,
}

impl SubagentNodeHandler {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl NodeHandler for SubagentNodeHandler {
    async fn run(&self, ctx: &NodeContext) -> NodeOutcome {
        let NodeKind::Subagent { graph } = ctx.kind() else {
            return NodeOutcome::Failure {
                error: format!("SubagentNodeHandler invoked for non-subagent node '{}'", ctx.node_id),
                retryable: false,
            };
        };
        let arguments = ctx.reads.get("input").cloned().unwrap_or(serde_json::Value::Null);
        let call = ToolCall::new(Uuid::new_v4().to_string(), graph.clone(), arguments);
        let result = self.tools.dispatch(call).await;
        if let Some(output) = result.output {
            let mut writes = HashMap::new();
            writes.insert("result".to_string(), output);
            NodeOutcome::success(writes)
        } else {
            NodeOutcome::Failure {
                error: result.error.unwrap_or_else(|| "subagent call failed".to_string()),
                retryable: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeSpec, PausePolicy};
    use crate::scope::ExecutionScope;
    use llm::{ChatResponse, ChatStreamResponse};
    use tooling::{Tool, ToolCallResult};

    fn ctx(kind: NodeKind, reads: HashMap<String, serde_json::Value>) -> NodeContext {
        NodeContext {
            node_id: "n".to_string(),
            node: NodeSpec::new("n", kind),
            scope: ExecutionScope { execution_id: "e".into(), stream_id: "s".into(), runtime_id: "r".into() },
            reads,
            feedback: None,
        }
    }

    fn ctx_with_pause(reads: HashMap<String, serde_json::Value>, policy: Option<PausePolicy>) -> NodeContext {
        let mut spec = NodeSpec::new("n", NodeKind::Pause);
        spec.pause = policy;
        NodeContext {
            node_id: "n".to_string(),
            node: spec,
            scope: ExecutionScope { execution_id: "e".into(), stream_id: "s".into(), runtime_id: "r".into() },
            reads,
            feedback: None,
        }
    }

    #[tokio::test]
    async fn function_handler_dispatches_by_name() {
        let mut handler = FunctionNodeHandler::new();
        handler.register("double", |c: &NodeContext| {
            let n = c.reads.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            let mut writes = HashMap::new();
            writes.insert("n".to_string(), serde_json::json!(n * 2));
            NodeOutcome::success(writes)
        });

        let reads = HashMap::from([("n".to_string(), serde_json::json!(3))]);
        let outcome = handler
            .run(&ctx(NodeKind::Function { handler: "double".into() }, reads))
            .await;
        match outcome {
            NodeOutcome::Success { writes, .. } => assert_eq!(writes["n"], serde_json::json!(6)),
            _ => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn function_handler_fails_for_unknown_name() {
        let handler = FunctionNodeHandler::new();
        let outcome = handler
            .run(&ctx(NodeKind::Function { handler: "missing".into() }, HashMap::new()))
            .await;
        assert!(matches!(outcome, NodeOutcome::Failure { retryable: false, .. }));
    }

    struct EchoModel;

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn chat(&self, request: ChatRequest) -> llm::Result<ChatResponse> {
            let text = request.messages.first().map(|m| m.content.clone()).unwrap_or_default();
            Ok(ChatResponse {
                message: LlmMessage::assistant(format!("echo: {text}")),
                usage: None,
                reasoning: None,
                metadata: Default::default(),
            })
        }

        async fn stream(&self, _request: ChatRequest) -> llm::Result<ChatStreamResponse> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn llm_handler_writes_response() {
        let handler = LlmNodeHandler::new(Arc::new(EchoModel));
        let reads = HashMap::from([("prompt".to_string(), serde_json::json!("hi"))]);
        let outcome = handler
            .run(&ctx(NodeKind::Llm { model: "echo".into() }, reads))
            .await;
        match outcome {
            NodeOutcome::Success { writes, .. } => {
                assert_eq!(writes["response"], serde_json::json!("echo: hi"));
            }
            _ => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn router_handler_evaluates_expression() {
        let handler = RouterNodeHandler;
        let expression = serde_json::to_string(&crate::expr::Condition::Single(
            crate::expr::Check::GreaterThan { path: "score".into(), value: 5.0 },
        ))
        .unwrap();
        let reads = HashMap::from([("score".to_string(), serde_json::json!(7))]);
        let outcome = handler.run(&ctx(NodeKind::Router { expression }, reads)).await;
        match outcome {
            NodeOutcome::Success { writes, metrics } => {
                assert_eq!(writes["route"], serde_json::json!(true));
                assert_eq!(metrics.chosen.as_deref(), Some("true"));
            }
            _ => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn pause_handler_suspends_with_its_configured_message() {
        let handler = PauseNodeHandler;
        let outcome = handler
            .run(&ctx_with_pause(HashMap::new(), Some(PausePolicy::new("awaiting approval"))))
            .await;
        assert!(matches!(outcome, NodeOutcome::Suspend { reason } if reason == "awaiting approval"));
    }

    #[tokio::test]
    async fn pause_handler_fails_without_a_pause_policy() {
        let handler = PauseNodeHandler;
        let outcome = handler.run(&ctx_with_pause(HashMap::new(), None)).await;
        assert!(matches!(outcome, NodeOutcome::Failure { .. }));
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "child-graph"
        }

        fn description(&self) -> &str {
            "echoes its input as the subagent result"
        }

        async fn call(&self, call: ToolCall) -> tooling::Result<ToolCallResult> {
            Ok(ToolCallResult::success(call.id, call.arguments))
        }
    }

    #[tokio::test]
    async fn subagent_handler_dispatches_through_tool_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let handler = SubagentNodeHandler::new(Arc::new(registry));

        let reads = HashMap::from([("input".to_string(), serde_json::json!({"x": 1}))]);
        let outcome = handler
            .run(&ctx(NodeKind::Subagent { graph: "child-graph".into() }, reads))
            .await;
        match outcome {
            NodeOutcome::Success { writes, .. } => assert_eq!(writes["result"], serde_json::json!({"x": 1})),
            _ => panic!("expected success"),
        }
    }
}
