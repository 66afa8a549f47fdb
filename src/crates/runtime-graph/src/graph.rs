//! Graph model (C1): nodes, edges, and the persisted document form, plus
//! `Graph::validate` — generalized from `runtime_graph::graph::Graph::validate`
//! (entry/edge-source/edge-target/branch-target existence checks) with
//! additions the teacher's acyclic-by-convention graphs didn't need: a pause
//! node must carry a pause policy and have at least one outgoing edge, every
//! cycle must pass through a node carrying a finite visit budget, every
//! declared terminal node must be reachable from the entry, and a router
//! node may not declare output keys of its own.

use crate::error::GraphError;
use crate::expr::Condition;
use crate::node::{NodeId, NodeKind};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

pub const START: &str = "__start__";
pub const END: &str = "__end__";

/// A node's pause behavior: the human-facing prompt and how long the
/// executor waits for `resume()` before failing the execution with
/// `PauseTimeout`. Required on every `Pause`-kind node (§3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PausePolicy {
    pub message: String,
    pub timeout_seconds: Option<u64>,
}

impl PausePolicy {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), timeout_seconds: None }
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

/// A node's post-success validation: how many times a failed schema check
/// may be retried (with a feedback channel back to the handler) before the
/// node fails with `ValidationFailed`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationPolicy {
    pub max_retries: u32,
    pub schema: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Keys this node reads from shared state before dispatch. Missing keys
    /// fail the node with `InputMissing` before the handler ever runs.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Keys this node must write on success. A successful outcome missing
    /// any of these fails with `ValidationFailed`; writing any key *not*
    /// declared here fails with `ScopeViolation`.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Optional JSON-Schema-shaped document checked against each declared
    /// output's value (object `properties`/`required`/`type` subset).
    #[serde(default)]
    pub output_schema: Option<Value>,
    /// Per-node retry override; falls back to the executor's configured
    /// default policy when absent.
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub validation: Option<ValidationPolicy>,
    #[serde(default)]
    pub pause: Option<PausePolicy>,
    /// Maximum times this node may be (re-)visited within one execution.
    /// Required for any node that participates in a cycle.
    #[serde(default)]
    pub visit_budget: Option<u32>,
}

impl NodeSpec {
    /// Minimal constructor for tests and simple graphs: no declared
    /// inputs/outputs/policies beyond `kind`.
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            output_schema: None,
            retry: None,
            validation: None,
            pause: None,
            visit_budget: None,
        }
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pause(mut self, policy: PausePolicy) -> Self {
        self.pause = Some(policy);
        self
    }

    pub fn with_validation(mut self, policy: ValidationPolicy) -> Self {
        self.validation = Some(policy);
        self
    }

    pub fn with_visit_budget(mut self, budget: u32) -> Self {
        self.visit_budget = Some(budget);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Edge {
    Direct {
        from: NodeId,
        to: NodeId,
    },
    /// Taken only when the source node's dispatch failed; never considered
    /// during success routing. At most one per source (§3 invariant maps
    /// onto "at most one unconditional edge per source" for each of the
    /// success and failure cases independently).
    OnFailure {
        from: NodeId,
        to: NodeId,
    },
    Conditional {
        from: NodeId,
        condition: Condition,
        then: NodeId,
        otherwise: NodeId,
    },
}

impl Edge {
    pub fn source(&self) -> &NodeId {
        match self {
            Edge::Direct { from, .. } => from,
            Edge::OnFailure { from, .. } => from,
            Edge::Conditional { from, .. } => from,
        }
    }

    pub fn targets(&self) -> Vec<&NodeId> {
        match self {
            Edge::Direct { to, .. } => vec![to],
            Edge::OnFailure { to, .. } => vec![to],
            Edge::Conditional { then, otherwise, .. } => vec![then, otherwise],
        }
    }

    pub fn is_on_failure(&self) -> bool {
        matches!(self, Edge::OnFailure { .. })
    }
}

/// The persisted form of a graph (§6): a JSON/YAML document describing
/// nodes and edges, independent of any running execution. `schema_version`
/// lets callers detect an incompatible document before `Graph::from_spec`
/// ever runs validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSpec {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub name: String,
    pub entry: NodeId,
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<Edge>,
    /// Terminal nodes as declared in the persisted document. When empty,
    /// any node with no outgoing edges is treated as implicitly terminal —
    /// convenient for hand-built graphs and every pre-existing test graph in
    /// this workspace that never named its terminal set explicitly.
    #[serde(default)]
    pub terminal_nodes: Vec<NodeId>,
}

fn default_schema_version() -> u32 {
    1
}

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// An immutable, validated graph ready for execution.
#[derive(Debug, Clone)]
pub struct Graph {
    pub name: String,
    pub entry: NodeId,
    pub nodes: HashMap<NodeId, NodeSpec>,
    pub edges: Vec<Edge>,
    pub terminal_nodes: HashSet<NodeId>,
}

impl Graph {
    pub fn from_spec(spec: GraphSpec) -> Result<Self, GraphError> {
        if spec.schema_version > CURRENT_SCHEMA_VERSION {
            return Err(GraphError::Validation(format!(
                "graph document schema_version {} is newer than the supported version {}",
                spec.schema_version, CURRENT_SCHEMA_VERSION
            )));
        }
        let nodes: HashMap<NodeId, NodeSpec> =
            spec.nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
        let mut terminal_nodes: HashSet<NodeId> = spec.terminal_nodes.into_iter().collect();

        // Implicit terminal inference: any node with no outgoing edges and
        // not explicitly named terminal is still a dead end and should
        // behave as terminal rather than raising `NoEdgeMatched`.
        let edges = spec.edges;
        let sources: HashSet<&NodeId> = edges.iter().map(|e| e.source()).collect();
        if terminal_nodes.is_empty() {
            for id in nodes.keys() {
                if !sources.contains(id) {
                    terminal_nodes.insert(id.clone());
                }
            }
        }

        let graph = Graph { name: spec.name, entry: spec.entry, nodes, edges, terminal_nodes };
        graph.validate()?;
        Ok(graph)
    }

    pub fn entry(&self) -> &NodeId {
        &self.entry
    }

    /// The first real node a traversal reaches, resolving the `__start__`
    /// pseudo-node to its single direct edge's target. Used both by the
    /// executor to seed its loop and by admission to validate a trigger
    /// payload against the entry node's declared inputs (§4.6).
    pub fn real_entry(&self) -> Result<&NodeId, GraphError> {
        if self.entry != START {
            return Ok(&self.entry);
        }
        self.edges_from(START)
            .first()
            .map(|e| e.targets()[0])
            .ok_or(GraphError::MissingEntry)
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    pub fn outgoing_edges(&self, id: &str) -> Vec<&Edge> {
        self.edges_from(id)
    }

    pub fn edges_from(&self, node: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source() == node).collect()
    }

    pub fn is_terminal(&self, id: &str) -> bool {
        self.terminal_nodes.contains(id)
    }

    pub fn is_pause(&self, id: &str) -> bool {
        matches!(self.nodes.get(id).map(|n| &n.kind), Some(NodeKind::Pause))
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        if self.entry.is_empty() {
            return Err(GraphError::MissingEntry);
        }
        if self.entry != START && !self.nodes.contains_key(&self.entry) {
            return Err(GraphError::Validation(format!(
                "entry point '{}' is not a known node",
                self.entry
            )));
        }

        for edge in &self.edges {
            let source = edge.source();
            if source != START && !self.nodes.contains_key(source) {
                return Err(GraphError::UnknownTarget {
                    node: source.clone(),
                    target: source.clone(),
                });
            }
            for target in edge.targets() {
                if target != END && !self.nodes.contains_key(target) {
                    return Err(GraphError::UnknownTarget {
                        node: source.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        // At most one on-failure edge, and at most one unconditional/success
        // edge, per source node.
        for id in self.nodes.keys() {
            let edges = self.edges_from(id);
            let on_failure_count = edges.iter().filter(|e| e.is_on_failure()).count();
            if on_failure_count > 1 {
                return Err(GraphError::Validation(format!(
                    "node '{id}' declares more than one on-failure edge"
                )));
            }
            let unconditional_count = edges
                .iter()
                .filter(|e| matches!(e, Edge::Direct { .. }))
                .count();
            if unconditional_count > 1 {
                return Err(GraphError::Validation(format!(
                    "node '{id}' declares more than one unconditional edge"
                )));
            }
        }

        for (id, node) in &self.nodes {
            match &node.kind {
                NodeKind::Pause => {
                    if node.pause.is_none() {
                        return Err(GraphError::Validation(format!(
                            "pause node '{id}' has no pause policy"
                        )));
                    }
                    if self.edges_from(id).is_empty() {
                        return Err(GraphError::Validation(format!(
                            "pause node '{id}' has no outgoing edge and would be terminal"
                        )));
                    }
                    if self.terminal_nodes.contains(id) {
                        return Err(GraphError::Validation(format!(
                            "pause node '{id}' may not be a terminal node"
                        )));
                    }
                }
                NodeKind::Router { .. } if !node.outputs.is_empty() => {
                    return Err(GraphError::Validation(format!(
                        "router node '{id}' may not declare output keys required downstream"
                    )));
                }
                _ => {}
            }
            if let Some(validation) = &node.validation {
                let _ = validation.max_retries; // budgets are unsigned, always >= 0
            }
        }

        self.check_reachable_terminals()?;
        self.check_cycles()?;
        Ok(())
    }

    /// Every declared terminal node must be reachable from the entry point,
    /// otherwise the graph document describes dead code no execution could
    /// ever reach.
    fn check_reachable_terminals(&self) -> Result<(), GraphError> {
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::new();
        if self.entry == START {
            for edge in self.edges_from(START) {
                for target in edge.targets() {
                    if target != END {
                        queue.push_back(target.clone());
                    }
                }
            }
        } else {
            queue.push_back(self.entry.clone());
        }

        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id.clone()) {
                continue;
            }
            for edge in self.edges_from(&id) {
                for target in edge.targets() {
                    if target != END && !reachable.contains(target) {
                        queue.push_back(target.clone());
                    }
                }
            }
        }

        for terminal in &self.terminal_nodes {
            if !reachable.contains(terminal) {
                return Err(GraphError::Validation(format!(
                    "terminal node '{terminal}' is unreachable from the entry point"
                )));
            }
        }
        Ok(())
    }

    /// DFS-based cycle detection: any cycle found must include at least one
    /// node with a `visit_budget`, otherwise the graph could loop forever.
    fn check_cycles(&self) -> Result<(), GraphError> {
        let mut visiting = HashSet::new();
        let mut visited = HashSet::new();

        for id in self.nodes.keys() {
            if !visited.contains(id) {
                self.dfs(id, &mut visiting, &mut visited, &mut Vec::new())?;
            }
        }
        Ok(())
    }

    fn dfs(
        &self,
        node: &str,
        visiting: &mut HashSet<NodeId>,
        visited: &mut HashSet<NodeId>,
        path: &mut Vec<NodeId>,
    ) -> Result<(), GraphError> {
        visiting.insert(node.to_string());
        path.push(node.to_string());

        for edge in self.edges_from(node) {
            for target in edge.targets() {
                if target == END {
                    continue;
                }
                if visiting.contains(target) {
                    let cycle_has_budget = path
                        .iter()
                        .skip_while(|n| *n != target)
                        .any(|n| self.nodes.get(n).and_then(|s| s.visit_budget).is_some());
                    if !cycle_has_budget {
                        return Err(GraphError::UnboundedCycle { node: target.clone() });
                    }
                } else if !visited.contains(target) {
                    self.dfs(target, visiting, visited, path)?;
                }
            }
        }

        path.pop();
        visiting.remove(node);
        visited.insert(node.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    fn function_node(id: &str) -> NodeSpec {
        NodeSpec::new(id, NodeKind::Function { handler: "noop".to_string() })
    }

    #[test]
    fn validates_a_simple_linear_graph() {
        let spec = GraphSpec {
            schema_version: 1,
            name: "linear".into(),
            entry: START.into(),
            nodes: vec![function_node("a"), function_node("b")],
            edges: vec![
                Edge::Direct { from: START.into(), to: "a".into() },
                Edge::Direct { from: "a".into(), to: "b".into() },
                Edge::Direct { from: "b".into(), to: END.into() },
            ],
            terminal_nodes: vec!["b".into()],
        };
        assert!(Graph::from_spec(spec).is_ok());
    }

    #[test]
    fn rejects_edge_to_unknown_node() {
        let spec = GraphSpec {
            schema_version: 1,
            name: "broken".into(),
            entry: START.into(),
            nodes: vec![function_node("a")],
            edges: vec![
                Edge::Direct { from: START.into(), to: "a".into() },
                Edge::Direct { from: "a".into(), to: "missing".into() },
            ],
            terminal_nodes: vec![],
        };
        assert!(matches!(Graph::from_spec(spec), Err(GraphError::UnknownTarget { .. })));
    }

    #[test]
    fn rejects_cycle_without_visit_budget() {
        let spec = GraphSpec {
            schema_version: 1,
            name: "loop".into(),
            entry: START.into(),
            nodes: vec![function_node("a"), function_node("b")],
            edges: vec![
                Edge::Direct { from: START.into(), to: "a".into() },
                Edge::Direct { from: "a".into(), to: "b".into() },
                Edge::Direct { from: "b".into(), to: "a".into() },
            ],
            terminal_nodes: vec![],
        };
        assert!(matches!(Graph::from_spec(spec), Err(GraphError::UnboundedCycle { .. })));
    }

    #[test]
    fn allows_cycle_with_visit_budget() {
        let a = function_node("a").with_visit_budget(3);
        let spec = GraphSpec {
            schema_version: 1,
            name: "bounded-loop".into(),
            entry: START.into(),
            nodes: vec![a, function_node("b")],
            edges: vec![
                Edge::Direct { from: START.into(), to: "a".into() },
                Edge::Direct { from: "a".into(), to: "b".into() },
                Edge::Direct { from: "b".into(), to: "a".into() },
            ],
            terminal_nodes: vec![],
        };
        assert!(Graph::from_spec(spec).is_ok());
    }

    #[test]
    fn rejects_pause_node_with_no_pause_policy() {
        let spec = GraphSpec {
            schema_version: 1,
            name: "policyless-pause".into(),
            entry: START.into(),
            nodes: vec![NodeSpec::new("p", NodeKind::Pause)],
            edges: vec![
                Edge::Direct { from: START.into(), to: "p".into() },
                Edge::Direct { from: "p".into(), to: END.into() },
            ],
            terminal_nodes: vec![],
        };
        assert!(matches!(Graph::from_spec(spec), Err(GraphError::Validation(_))));
    }

    #[test]
    fn rejects_pause_node_with_no_outgoing_edge() {
        let spec = GraphSpec {
            schema_version: 1,
            name: "dead-end-pause".into(),
            entry: START.into(),
            nodes: vec![NodeSpec::new("p", NodeKind::Pause)
                .with_pause(PausePolicy::new("waiting"))],
            edges: vec![Edge::Direct { from: START.into(), to: "p".into() }],
            terminal_nodes: vec![],
        };
        assert!(matches!(Graph::from_spec(spec), Err(GraphError::Validation(_))));
    }

    #[test]
    fn rejects_unreachable_terminal_node() {
        let spec = GraphSpec {
            schema_version: 1,
            name: "unreachable".into(),
            entry: START.into(),
            nodes: vec![function_node("a"), function_node("orphan")],
            edges: vec![
                Edge::Direct { from: START.into(), to: "a".into() },
                Edge::Direct { from: "a".into(), to: END.into() },
            ],
            terminal_nodes: vec!["orphan".into()],
        };
        assert!(matches!(Graph::from_spec(spec), Err(GraphError::Validation(_))));
    }

    #[test]
    fn rejects_router_node_declaring_outputs() {
        let bad = NodeSpec::new("r", NodeKind::Router { expression: "true".into() })
            .with_outputs(["x"]);
        let spec = GraphSpec {
            schema_version: 1,
            name: "bad-router".into(),
            entry: START.into(),
            nodes: vec![bad],
            edges: vec![
                Edge::Direct { from: START.into(), to: "r".into() },
                Edge::Direct { from: "r".into(), to: END.into() },
            ],
            terminal_nodes: vec![],
        };
        assert!(matches!(Graph::from_spec(spec), Err(GraphError::Validation(_))));
    }

    #[test]
    fn allows_an_on_failure_edge_alongside_the_success_edge() {
        let spec = GraphSpec {
            schema_version: 1,
            name: "on-failure".into(),
            entry: START.into(),
            nodes: vec![function_node("a"), function_node("b"), function_node("d")],
            edges: vec![
                Edge::Direct { from: START.into(), to: "a".into() },
                Edge::Direct { from: "a".into(), to: "b".into() },
                Edge::OnFailure { from: "a".into(), to: "d".into() },
                Edge::Direct { from: "b".into(), to: END.into() },
                Edge::Direct { from: "d".into(), to: END.into() },
            ],
            terminal_nodes: vec!["b".into(), "d".into()],
        };
        assert!(Graph::from_spec(spec).is_ok());
    }
}
