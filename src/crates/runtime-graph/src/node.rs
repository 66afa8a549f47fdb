//! Node registry and kinds (C3): a closed enum of node kinds dispatched
//! through a `NodeHandler` trait object, replacing the reflection-based
//! registry pattern the redesign flags call out. Generalized from the
//! teacher's closure-based `NodeExecutor` (`graph.rs`) into trait objects, one
//! struct per kind, so each kind can carry the fields it actually needs
//! (an LLM node needs a model id, a subagent node needs a child graph name)
//! instead of erasing everything behind a single closure signature.

use crate::error::GraphError;
use crate::graph::NodeSpec;
use crate::scope::ExecutionScope;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type NodeId = String;

/// The closed set of node kinds a graph can contain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Function { handler: String },
    Llm { model: String },
    Router { expression: String },
    /// A pause node's human-facing prompt and timeout live on
    /// [`crate::graph::NodeSpec::pause`], not here — the kind itself carries
    /// no fields, since every `Pause` node's behavior (always suspend) is
    /// identical regardless of instance.
    Pause,
    Subagent { graph: String },
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Function { .. } => "function",
            NodeKind::Llm { .. } => "llm",
            NodeKind::Router { .. } => "router",
            NodeKind::Pause => "pause",
            NodeKind::Subagent { .. } => "subagent",
        }
    }
}

/// Decision-relevant detail a handler may report alongside a successful
/// outcome — lifted onto the [`runtime_trace::Decision`] for that attempt by
/// the executor. Every field is optional: a `function` node reports none of
/// this, an `llm` node typically reports `tokens`/`cost`/`reasoning`, a
/// `router` node typically reports `options`/`chosen`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub tokens: Option<u64>,
    pub cost: Option<f64>,
    pub intent: Option<String>,
    pub options: Vec<String>,
    pub chosen: Option<String>,
    pub reasoning: Option<String>,
}

/// A node's output: success carries state patches, failure carries an
/// error for the retry policy to inspect, suspend carries a pause reason
/// for the executor's §4.4 pause path. Replaces exceptions as the sole
/// control-flow channel out of a node.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Success {
        writes: HashMap<String, Value>,
        metrics: NodeMetrics,
    },
    Failure {
        error: String,
        retryable: bool,
    },
    Suspend {
        reason: String,
    },
}

impl NodeOutcome {
    /// Convenience constructor for the common case of a success with no
    /// metrics to report (every `function`/`router` handler and most tests).
    pub fn success(writes: HashMap<String, Value>) -> Self {
        NodeOutcome::Success { writes, metrics: NodeMetrics::default() }
    }
}

/// Context handed to every node invocation: the full validated node spec
/// (kind plus its declared inputs/outputs/policies), the scope keys it's
/// allowed to touch, and the values read before dispatch.
pub struct NodeContext {
    pub node_id: NodeId,
    pub node: NodeSpec,
    pub scope: ExecutionScope,
    pub reads: HashMap<String, Value>,
    /// Set only on a validation retry (§4.4 step 4): describes what was
    /// wrong with the previous attempt's outputs so a handler — typically
    /// an `llm` node re-prompting the model — can correct course instead of
    /// blindly repeating the same outputs.
    pub feedback: Option<String>,
}

impl NodeContext {
    pub fn kind(&self) -> &NodeKind {
        &self.node.kind
    }
}

#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn run(&self, ctx: &NodeContext) -> NodeOutcome;
}

/// Dispatches a [`NodeKind`] to its registered [`NodeHandler`]. One handler
/// per kind label, not per node instance — many nodes of kind `Function`
/// share the same `FunctionNodeHandler` and differentiate via `ctx.node_id`
/// and the `handler` field carried on `NodeKind::Function`.
#[derive(Default)]
pub struct NodeRegistry {
    handlers: HashMap<&'static str, Arc<dyn NodeHandler>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind_label: &'static str, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(kind_label, handler);
    }

    pub fn get(&self, kind: &NodeKind) -> Result<Arc<dyn NodeHandler>, GraphError> {
        self.handlers
            .get(kind.label())
            .cloned()
            .ok_or_else(|| GraphError::Configuration(format!("no handler registered for node kind '{}'", kind.label())))
    }
}
