//! Graph executor (C4): the step-by-step dispatch loop. Grounded on the
//! superstep shape of `runtime_graph::pregel::loop_impl` for "one node per
//! step, re-evaluate routing after each" and on `retry::RetryPolicy` for
//! backoff timing; edge routing is delegated to [`crate::expr::Evaluator`].
//!
//! The loop takes an `Arc<dyn ExecutorHooks>` from `runtime-trace` rather
//! than owning a collector directly — an explicit hook interface instead of
//! the executor knowing anything about how traces are stored.
//!
//! `execute()` and `resume()` share one traversal loop (`run_loop`) that
//! differs only in its starting node: `execute()` starts at the graph's real
//! entry, `resume()` starts at the node reached by the paused node's first
//! outgoing edge (§4.6). A pause never blocks a task on its oneshot receiver
//! — `Suspend` returns `Paused` immediately, and resuming re-enters the loop
//! from scratch rather than waking anything in place.

use crate::error::{ExecutionFailure, FailureKind, GraphError, Result};
use crate::expr::{Condition, Evaluator};
use crate::graph::{Edge, Graph, NodeSpec, ValidationPolicy, END, START};
use crate::node::{NodeContext, NodeKind, NodeOutcome, NodeRegistry};
use crate::pause::PauseRegistry;
use crate::retry::RetryPolicy;
use crate::scope::{ExecutionScope, SharedStateManager};
use runtime_trace::{Decision, DecisionOutcome, ExecutorHooks, TraceStatus};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Safety cap on total steps per execution, independent of per-node visit
/// budgets — a last line of defense against a routing bug that keeps
/// picking a different but always-non-terminal node.
const MAX_STEPS: u64 = 10_000;

pub struct GraphExecutor {
    registry: Arc<NodeRegistry>,
    scope_manager: Arc<SharedStateManager>,
    pause_registry: Arc<PauseRegistry>,
    hooks: Arc<dyn ExecutorHooks>,
    default_retry: RetryPolicy,
    pause_ttl: Duration,
}

#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Completed,
    Failed(ExecutionFailure),
    Paused(Uuid),
}

impl GraphExecutor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        scope_manager: Arc<SharedStateManager>,
        pause_registry: Arc<PauseRegistry>,
        hooks: Arc<dyn ExecutorHooks>,
    ) -> Self {
        Self {
            registry,
            scope_manager,
            pause_registry,
            hooks,
            default_retry: RetryPolicy::default(),
            pause_ttl: Duration::from_secs(3600),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    pub fn with_pause_ttl(mut self, ttl: Duration) -> Self {
        self.pause_ttl = ttl;
        self
    }

    /// Run `graph` to completion, failure, or pause, starting at the real
    /// entry node (resolving the `__start__` pseudo-node).
    pub async fn execute(
        &self,
        graph: &Graph,
        execution_id: Uuid,
        scope: ExecutionScope,
    ) -> Result<ExecutionOutcome> {
        self.hooks.on_start(execution_id, scope.stream_id.clone(), graph.name.clone()).await;
        let start = graph.real_entry()?.clone();
        self.run_loop(graph, execution_id, scope, start).await
    }

    /// Resume a previously paused execution. Re-drives the traversal from
    /// the pause node's first outgoing edge rather than re-dispatching the
    /// pause node itself — the caller is expected to have already written
    /// the resume payload into the execution's private scope under the
    /// pause node's declared output keys before calling this.
    pub async fn resume(
        &self,
        graph: &Graph,
        execution_id: Uuid,
        scope: ExecutionScope,
        pause_node_id: &str,
    ) -> Result<ExecutionOutcome> {
        self.hooks.on_start(execution_id, scope.stream_id.clone(), graph.name.clone()).await;
        let next = graph
            .edges_from(pause_node_id)
            .first()
            .map(|e| e.targets()[0].clone())
            .ok_or_else(|| {
                GraphError::Validation(format!(
                    "pause node '{pause_node_id}' has no outgoing edge to resume through"
                ))
            })?;
        self.run_loop(graph, execution_id, scope, next).await
    }

    /// Manually fail a paused execution whose TTL expired before anyone
    /// called `resume()`. Called by the owning stream's pause-timeout sweep,
    /// not by anything inside this loop (which never blocks on a pause).
    pub async fn fail_pause_timeout(&self, execution_id: Uuid, node_id: &str) -> ExecutionFailure {
        let failure = ExecutionFailure::new(
            FailureKind::PauseTimeout,
            format!("pause on node '{node_id}' timed out before it was resumed"),
            Some(node_id.to_string()),
            0,
        );
        let now = chrono::Utc::now();
        self.hooks
            .on_decision(execution_id, decision_for_failure(0, node_id, now, now, 0, &failure))
            .await;
        self.hooks.on_finish(execution_id, TraceStatus::Failed).await;
        failure
    }

    async fn run_loop(
        &self,
        graph: &Graph,
        execution_id: Uuid,
        scope: ExecutionScope,
        start: String,
    ) -> Result<ExecutionOutcome> {
        let mut current = start;
        let mut visits: HashMap<String, u32> = HashMap::new();
        let mut step: u64 = 0;

        loop {
            if step >= MAX_STEPS {
                return Err(GraphError::Validation(format!(
                    "execution exceeded the maximum step count ({MAX_STEPS})"
                )));
            }
            if current == END {
                self.hooks.on_finish(execution_id, TraceStatus::Completed).await;
                return Ok(ExecutionOutcome::Completed);
            }

            let node = graph
                .nodes
                .get(&current)
                .ok_or_else(|| GraphError::Validation(format!("unknown node '{current}'")))?
                .clone();

            let visit_count = visits.entry(current.clone()).or_insert(0);
            *visit_count += 1;
            if let Some(budget) = node.visit_budget {
                if *visit_count > budget {
                    let failure = ExecutionFailure::new(
                        FailureKind::VisitBudgetExceeded,
                        format!("node '{current}' exceeded its visit budget of {budget}"),
                        Some(current.clone()),
                        0,
                    );
                    let started_at = chrono::Utc::now();
                    self.report_failure(execution_id, step, &current, started_at, 0, &failure).await;
                    return Ok(ExecutionOutcome::Failed(failure));
                }
            }

            // 1. Read this node's declared inputs from shared state: private
            // scope first (this execution's own working state), falling back
            // to stream-shared then runtime-shared.
            let reads = match self.collect_reads(&scope, &node) {
                Ok(reads) => reads,
                Err(failure) => {
                    let started_at = chrono::Utc::now();
                    self.report_failure(execution_id, step, &current, started_at, 0, &failure).await;
                    return Ok(ExecutionOutcome::Failed(failure));
                }
            };

            // 2-4. Dispatch through the registry with retry/backoff, and
            // (on a successful outcome) validate its writes against the
            // node's declared outputs/schema, retrying with feedback when a
            // validation retry budget remains (§4.4 step 4).
            let started_at = chrono::Utc::now();
            let policy = node.validation.clone().unwrap_or_default();
            let mut feedback: Option<String> = None;
            let mut validation_attempt = 0u32;
            let (outcome, attempt, finished_at) = loop {
                let ctx = NodeContext {
                    node_id: current.clone(),
                    node: node.clone(),
                    scope: scope.clone(),
                    reads: reads.clone(),
                    feedback: feedback.clone(),
                };
                let (outcome, attempt) = self.dispatch_with_retry(&node, &ctx).await?;
                let finished_at = chrono::Utc::now();
                if let NodeOutcome::Success { writes, .. } = &outcome {
                    if let Err(failure) = self.validate_outputs(&node, writes, &policy) {
                        if validation_attempt < policy.max_retries {
                            validation_attempt += 1;
                            warn!(
                                node = %current,
                                validation_attempt,
                                error = %failure.message,
                                "output validation failed, retrying with feedback"
                            );
                            feedback = Some(failure.message);
                            continue;
                        }
                        self.hooks
                            .on_decision(
                                execution_id,
                                decision_for_failure(step, &current, started_at, finished_at, attempt, &failure),
                            )
                            .await;
                        self.hooks.on_finish(execution_id, TraceStatus::Failed).await;
                        return Ok(ExecutionOutcome::Failed(failure));
                    }
                }
                break (outcome, attempt, finished_at);
            };

            match outcome {
                NodeOutcome::Success { writes, metrics } => {
                    for (key, value) in &writes {
                        self.scope_manager.set_private(&scope.execution_id, key, value.clone());
                    }
                    let full_state = self.scope_manager.snapshot_private(&scope.execution_id);

                    let next = match self.route_success(graph, &current, &full_state) {
                        Ok(next) => next,
                        Err(failure) => {
                            self.hooks
                                .on_decision(
                                    execution_id,
                                    decision_for_failure(step, &current, started_at, finished_at, attempt, &failure),
                                )
                                .await;
                            self.hooks.on_finish(execution_id, TraceStatus::Failed).await;
                            return Ok(ExecutionOutcome::Failed(failure));
                        }
                    };

                    let mut decision = Decision::new(
                        step,
                        current.clone(),
                        started_at,
                        finished_at,
                        attempt,
                        DecisionOutcome::Success,
                        Some(next.clone()),
                    );
                    decision.tokens = metrics.tokens;
                    decision.cost = metrics.cost;
                    decision.intent = metrics.intent;
                    decision.options = metrics.options;
                    decision.chosen = metrics.chosen;
                    decision.reasoning = metrics.reasoning;
                    self.hooks.on_decision(execution_id, decision).await;
                    debug!(node = %current, %next, "advanced");
                    current = next;
                }
                NodeOutcome::Failure { error, retryable: _ } => {
                    let failure = match self.route_failure(graph, &current) {
                        Some(next) => {
                            let decision = Decision::new(
                                step,
                                current.clone(),
                                started_at,
                                finished_at,
                                attempt,
                                DecisionOutcome::Failure {
                                    kind: failure_kind_for(&node).label().to_string(),
                                    error: error.clone(),
                                },
                                Some(next.clone()),
                            );
                            self.hooks.on_decision(execution_id, decision).await;
                            warn!(node = %current, %error, %next, "node failed, routing to on-failure edge");
                            current = next;
                            step += 1;
                            continue;
                        }
                        None => ExecutionFailure::new(
                            failure_kind_for(&node),
                            error,
                            Some(current.clone()),
                            attempt,
                        ),
                    };
                    self.hooks
                        .on_decision(
                            execution_id,
                            decision_for_failure(step, &current, started_at, finished_at, attempt, &failure),
                        )
                        .await;
                    self.hooks.on_finish(execution_id, TraceStatus::Failed).await;
                    warn!(node = %current, error = %failure.message, "execution failed");
                    return Ok(ExecutionOutcome::Failed(failure));
                }
                NodeOutcome::Suspend { reason } => {
                    self.hooks
                        .on_decision(
                            execution_id,
                            Decision::new(
                                step,
                                current.clone(),
                                started_at,
                                finished_at,
                                attempt,
                                DecisionOutcome::Suspend { reason: reason.clone() },
                                None,
                            ),
                        )
                        .await;
                    let timeout = node
                        .pause
                        .as_ref()
                        .and_then(|p| p.timeout_seconds)
                        .map(Duration::from_secs)
                        .unwrap_or(self.pause_ttl);
                    let (token, _rx) = self
                        .pause_registry
                        .suspend(execution_id, current.clone(), reason.clone(), timeout)
                        .await;
                    info!(node = %current, pause_id = %token.id, "execution paused");
                    self.hooks.on_finish(execution_id, TraceStatus::Paused).await;
                    return Ok(ExecutionOutcome::Paused(token.id));
                }
            }

            step += 1;
        }
    }

    async fn report_failure(
        &self,
        execution_id: Uuid,
        step: u64,
        node: &str,
        started_at: chrono::DateTime<chrono::Utc>,
        attempt: usize,
        failure: &ExecutionFailure,
    ) {
        let finished_at = chrono::Utc::now();
        self.hooks
            .on_decision(
                execution_id,
                decision_for_failure(step, node, started_at, finished_at, attempt, failure),
            )
            .await;
        self.hooks.on_finish(execution_id, TraceStatus::Failed).await;
    }

    /// Reads every key the node declares as an input, checking this
    /// execution's private scope first, then the stream-shared map, then the
    /// runtime-shared map. A missing key fails the node with `InputMissing`
    /// before the handler is ever invoked.
    fn collect_reads(
        &self,
        scope: &ExecutionScope,
        node: &NodeSpec,
    ) -> std::result::Result<HashMap<String, Value>, ExecutionFailure> {
        let mut reads = HashMap::new();
        for key in &node.inputs {
            let value = self
                .scope_manager
                .get_private(&scope.execution_id, key)
                .or_else(|| self.scope_manager.get_stream_shared(&scope.stream_id, key))
                .or_else(|| self.scope_manager.get_runtime_shared(key));
            match value {
                Some(value) => {
                    reads.insert(key.clone(), value);
                }
                None => {
                    return Err(ExecutionFailure::new(
                        FailureKind::InputMissing,
                        format!("node '{}' declares input '{key}' but it is not set", node.id),
                        Some(node.id.clone()),
                        0,
                    ));
                }
            }
        }
        Ok(reads)
    }

    /// Checks a successful outcome's writes against the node's declared
    /// outputs and, when present, the JSON-Schema-shaped document named by
    /// either the node's `output_schema` or its validation policy's
    /// `schema`: every declared output must be present (`ValidationFailed`
    /// otherwise), every written key must be declared (`ScopeViolation`
    /// otherwise) when the node declares any outputs at all, and the schema
    /// (when set) must accept the written object. Nodes with no declared
    /// outputs (most `router`/`pause`/ad-hoc test nodes) skip the
    /// presence/scope checks but still run the schema check if one is set.
    fn validate_outputs(
        &self,
        node: &NodeSpec,
        writes: &HashMap<String, Value>,
        policy: &ValidationPolicy,
    ) -> std::result::Result<(), ExecutionFailure> {
        if !node.outputs.is_empty() {
            for key in &node.outputs {
                if !writes.contains_key(key) {
                    return Err(ExecutionFailure::new(
                        FailureKind::ValidationFailed,
                        format!("node '{}' did not write its declared output '{key}'", node.id),
                        Some(node.id.clone()),
                        0,
                    ));
                }
            }
            for key in writes.keys() {
                if !node.outputs.contains(key) {
                    return Err(ExecutionFailure::new(
                        FailureKind::ScopeViolation,
                        format!("node '{}' wrote undeclared key '{key}'", node.id),
                        Some(node.id.clone()),
                        0,
                    ));
                }
            }
        }

        if let Some(schema) = policy.schema.as_ref().or(node.output_schema.as_ref()) {
            if let Err(reason) = check_schema(schema, writes) {
                return Err(ExecutionFailure::new(
                    FailureKind::ValidationFailed,
                    format!("node '{}' outputs failed schema validation: {reason}", node.id),
                    Some(node.id.clone()),
                    0,
                ));
            }
        }
        Ok(())
    }

    async fn dispatch_with_retry(
        &self,
        node: &NodeSpec,
        ctx: &NodeContext,
    ) -> Result<(NodeOutcome, usize)> {
        let handler = self.registry.get(&node.kind)?;
        let policy = node.retry.clone().unwrap_or_else(|| self.default_retry.clone());

        let mut attempt = 0usize;
        loop {
            let outcome = handler.run(ctx).await;
            match &outcome {
                NodeOutcome::Failure { retryable: true, .. } if policy.should_retry(attempt + 1) => {
                    let delay = policy.calculate_delay(attempt);
                    warn!(node = %node.id, attempt, ?delay, "node failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                _ => return Ok((outcome, attempt)),
            }
        }
    }

    /// Routes after a successful dispatch: evaluates the node's non-failure
    /// outgoing edges in order and only falls back to `graph.is_terminal`
    /// (routing to `END`) once none match (§4.4 step 7 orders it this way,
    /// not terminal-first, since a legally constructed graph may declare a
    /// terminal node with its own outgoing edges). Conditionals are
    /// evaluated against the execution's full accumulated private state
    /// (every key written so far, not just the latest node's writes), since
    /// a condition may reference state set several steps earlier. A
    /// condition that fails to evaluate degrades that edge to "not taken"
    /// (logged, not propagated) rather than failing the execution, per
    /// spec line 102. A non-terminal node whose only outgoing edges are
    /// `OnFailure` (or whose conditions all failed to evaluate) has nowhere
    /// to send a success and fails with `NoEdgeMatched`.
    fn route_success(
        &self,
        graph: &Graph,
        node_id: &str,
        state: &HashMap<String, Value>,
    ) -> std::result::Result<String, ExecutionFailure> {
        let edges: Vec<&Edge> = graph
            .edges_from(node_id)
            .into_iter()
            .filter(|e| !e.is_on_failure())
            .collect();
        for edge in &edges {
            if let Edge::Conditional { condition, then, otherwise, .. } = edge {
                match Self::evaluate(condition, state, node_id) {
                    Ok(matched) => return Ok(if matched { then.clone() } else { otherwise.clone() }),
                    Err(failure) => {
                        warn!(node = %node_id, %failure, "edge condition evaluation failed, treating edge as not taken");
                        continue;
                    }
                }
            }
        }
        if let Some(edge) = edges.iter().find(|e| matches!(e, Edge::Direct { .. })) {
            return Ok(edge.targets()[0].clone());
        }
        if graph.is_terminal(node_id) {
            return Ok(END.to_string());
        }
        Err(ExecutionFailure::new(
            FailureKind::NoEdgeMatched,
            format!("node '{node_id}' has no success edge to route through"),
            Some(node_id.to_string()),
            0,
        ))
    }

    fn route_failure(&self, graph: &Graph, node_id: &str) -> Option<String> {
        graph
            .edges_from(node_id)
            .into_iter()
            .find(|e| e.is_on_failure())
            .map(|e| e.targets()[0].clone())
    }

    fn evaluate(
        condition: &Condition,
        state: &HashMap<String, Value>,
        node_id: &str,
    ) -> std::result::Result<bool, ExecutionFailure> {
        Evaluator::evaluate(condition, state).map_err(|e| {
            ExecutionFailure::new(
                FailureKind::NoEdgeMatched,
                format!("edge condition evaluation failed: {e}"),
                Some(node_id.to_string()),
                0,
            )
        })
    }
}

fn decision_for_failure(
    step: u64,
    node: &str,
    started_at: chrono::DateTime<chrono::Utc>,
    finished_at: chrono::DateTime<chrono::Utc>,
    attempt: usize,
    failure: &ExecutionFailure,
) -> Decision {
    Decision::new(
        step,
        node.to_string(),
        started_at,
        finished_at,
        attempt,
        DecisionOutcome::Failure { kind: failure.kind.label().to_string(), error: failure.message.clone() },
        None,
    )
}

fn failure_kind_for(node: &NodeSpec) -> FailureKind {
    match &node.kind {
        NodeKind::Function { .. } => FailureKind::FunctionError,
        NodeKind::Llm { .. } => FailureKind::LlmError,
        NodeKind::Router { .. } => FailureKind::FunctionError,
        NodeKind::Pause => FailureKind::PauseTimeout,
        NodeKind::Subagent { .. } => FailureKind::ToolError,
    }
}

/// A minimal JSON-Schema subset check (`required`/`properties[].type`)
/// against a node's combined writes, treated as one JSON object. Anything
/// beyond that subset (formats, `$ref`, combinators) is out of scope — §3
/// calls for "an optional schema", not a full validator.
fn check_schema(schema: &Value, writes: &HashMap<String, Value>) -> std::result::Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };
    let value = serde_json::to_value(writes).map_err(|e| e.to_string())?;

    if let Some(required) = schema_obj.get("required").and_then(|r| r.as_array()) {
        for req in required {
            if let Some(key) = req.as_str() {
                if value.get(key).is_none() {
                    return Err(format!("missing required property '{key}'"));
                }
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(|p| p.as_object()) {
        for (key, prop_schema) in properties {
            let Some(found) = value.get(key) else { continue };
            if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
                if !json_type_matches(found, expected_type) {
                    return Err(format!(
                        "property '{key}' expected type '{expected_type}', got {}",
                        json_type_name(found)
                    ));
                }
            }
        }
    }
    Ok(())
}

fn json_type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphSpec, NodeSpec, PausePolicy};
    use crate::node::{NodeHandler, NodeKind, NodeRegistry};
    use crate::pause::PauseRegistry;
    use async_trait::async_trait;
    use runtime_trace::NullHooks;

    struct AlwaysFails;

    #[async_trait]
    impl NodeHandler for AlwaysFails {
        async fn run(&self, _ctx: &NodeContext) -> NodeOutcome {
            NodeOutcome::Failure { error: "boom".into(), retryable: false }
        }
    }

    fn base_executor(registry: NodeRegistry) -> GraphExecutor {
        GraphExecutor::new(
            Arc::new(registry),
            Arc::new(SharedStateManager::new()),
            Arc::new(PauseRegistry::new()),
            Arc::new(NullHooks),
        )
    }

    fn scope() -> ExecutionScope {
        ExecutionScope { execution_id: Uuid::new_v4().to_string(), stream_id: "s".into(), runtime_id: "r".into() }
    }

    #[tokio::test]
    async fn routes_to_on_failure_edge_when_a_node_fails() {
        let mut registry = NodeRegistry::new();
        registry.register("function", Arc::new(AlwaysFails));

        let spec = GraphSpec {
            schema_version: 1,
            name: "on-failure".into(),
            entry: START.into(),
            nodes: vec![
                NodeSpec::new("a", NodeKind::Function { handler: "noop".into() }),
                NodeSpec::new("recover", NodeKind::Function { handler: "noop".into() }),
            ],
            edges: vec![
                Edge::Direct { from: START.into(), to: "a".into() },
                Edge::OnFailure { from: "a".into(), to: "recover".into() },
                Edge::Direct { from: "recover".into(), to: END.into() },
            ],
            terminal_nodes: vec!["recover".into()],
        };
        let graph = Graph::from_spec(spec).unwrap();
        let executor = base_executor(registry);
        let outcome = executor.execute(&graph, Uuid::new_v4(), scope()).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed));
    }

    #[tokio::test]
    async fn a_terminal_node_with_outgoing_edges_still_follows_them() {
        // A node declared terminal may still carry its own outgoing edges
        // (graph validation only forbids this for pause nodes); §4.4 step 7
        // evaluates edges before falling back to the terminal check.
        let mut registry = NodeRegistry::new();
        registry.register("function", Arc::new(NoopSuccess));

        let spec = GraphSpec {
            schema_version: 1,
            name: "terminal-with-edge".into(),
            entry: START.into(),
            nodes: vec![
                NodeSpec::new("a", NodeKind::Function { handler: "noop".into() }),
                NodeSpec::new("b", NodeKind::Function { handler: "noop".into() }),
            ],
            edges: vec![
                Edge::Direct { from: START.into(), to: "a".into() },
                Edge::Direct { from: "a".into(), to: "b".into() },
                Edge::Direct { from: "b".into(), to: END.into() },
            ],
            terminal_nodes: vec!["a".into(), "b".into()],
        };
        let graph = Graph::from_spec(spec).unwrap();
        let executor = base_executor(registry);
        let outcome = executor.execute(&graph, Uuid::new_v4(), scope()).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed));
    }

    #[tokio::test]
    async fn a_failing_edge_condition_degrades_to_not_taken_instead_of_failing_the_execution() {
        use crate::expr::{Check, Condition};

        let mut registry = NodeRegistry::new();
        registry.register("function", Arc::new(NoopSuccess));

        let spec = GraphSpec {
            schema_version: 1,
            name: "bad-condition".into(),
            entry: START.into(),
            nodes: vec![
                NodeSpec::new("a", NodeKind::Function { handler: "noop".into() }),
                NodeSpec::new("b", NodeKind::Function { handler: "noop".into() }),
            ],
            edges: vec![
                Edge::Direct { from: START.into(), to: "a".into() },
                // References a key that was never written, so evaluation
                // fails rather than returning a boolean.
                Edge::Conditional {
                    from: "a".into(),
                    condition: Condition::Single(Check::GreaterThan {
                        path: "missing".into(),
                        value: 1.0,
                    }),
                    then: "b".into(),
                    otherwise: "b".into(),
                },
                Edge::Direct { from: "a".into(), to: "b".into() },
                Edge::Direct { from: "b".into(), to: END.into() },
            ],
            terminal_nodes: vec!["b".into()],
        };
        let graph = Graph::from_spec(spec).unwrap();
        let executor = base_executor(registry);
        let outcome = executor.execute(&graph, Uuid::new_v4(), scope()).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed));
    }

    struct NoopSuccess;

    #[async_trait]
    impl NodeHandler for NoopSuccess {
        async fn run(&self, _ctx: &NodeContext) -> NodeOutcome {
            NodeOutcome::success(HashMap::new())
        }
    }

    #[tokio::test]
    async fn exhausts_retries_at_exactly_max_attempts() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct AlwaysFailsRetryable(Arc<AtomicUsize>);
        #[async_trait]
        impl NodeHandler for AlwaysFailsRetryable {
            async fn run(&self, _ctx: &NodeContext) -> NodeOutcome {
                self.0.fetch_add(1, Ordering::SeqCst);
                NodeOutcome::Failure { error: "boom".into(), retryable: true }
            }
        }

        let attempts = Arc::new(AtomicUsize::new(0));
        let mut registry = NodeRegistry::new();
        registry.register("function", Arc::new(AlwaysFailsRetryable(attempts.clone())));

        let retry = RetryPolicy::new(3).with_initial_interval(0.001).with_jitter(false);
        let mut node = NodeSpec::new("a", NodeKind::Function { handler: "noop".into() });
        node.retry = Some(retry);

        let spec = GraphSpec {
            schema_version: 1,
            name: "retry-exhaustion".into(),
            entry: START.into(),
            nodes: vec![node],
            edges: vec![
                Edge::Direct { from: START.into(), to: "a".into() },
                Edge::Direct { from: "a".into(), to: END.into() },
            ],
            terminal_nodes: vec!["a".into()],
        };
        let graph = Graph::from_spec(spec).unwrap();
        let executor = base_executor(registry);
        let outcome = executor.execute(&graph, Uuid::new_v4(), scope()).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Failed(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fails_with_input_missing_when_a_declared_input_is_absent() {
        let mut registry = NodeRegistry::new();
        registry.register("function", Arc::new(NoopSuccess));

        let spec = GraphSpec {
            schema_version: 1,
            name: "needs-input".into(),
            entry: START.into(),
            nodes: vec![NodeSpec::new("a", NodeKind::Function { handler: "noop".into() })
                .with_inputs(["missing_key"])],
            edges: vec![
                Edge::Direct { from: START.into(), to: "a".into() },
                Edge::Direct { from: "a".into(), to: END.into() },
            ],
            terminal_nodes: vec!["a".into()],
        };
        let graph = Graph::from_spec(spec).unwrap();
        let executor = base_executor(registry);
        let outcome = executor.execute(&graph, Uuid::new_v4(), scope()).await.unwrap();
        match outcome {
            ExecutionOutcome::Failed(failure) => assert_eq!(failure.kind, FailureKind::InputMissing),
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn fails_with_scope_violation_when_a_node_writes_an_undeclared_key() {
        struct WritesExtra;
        #[async_trait]
        impl NodeHandler for WritesExtra {
            async fn run(&self, _ctx: &NodeContext) -> NodeOutcome {
                let mut writes = HashMap::new();
                writes.insert("unexpected".into(), serde_json::json!(1));
                NodeOutcome::success(writes)
            }
        }
        let mut registry = NodeRegistry::new();
        registry.register("function", Arc::new(WritesExtra));

        let spec = GraphSpec {
            schema_version: 1,
            name: "scoped".into(),
            entry: START.into(),
            nodes: vec![NodeSpec::new("a", NodeKind::Function { handler: "noop".into() })
                .with_outputs(["expected"])],
            edges: vec![
                Edge::Direct { from: START.into(), to: "a".into() },
                Edge::Direct { from: "a".into(), to: END.into() },
            ],
            terminal_nodes: vec!["a".into()],
        };
        let graph = Graph::from_spec(spec).unwrap();
        let executor = base_executor(registry);
        let outcome = executor.execute(&graph, Uuid::new_v4(), scope()).await.unwrap();
        match outcome {
            ExecutionOutcome::Failed(failure) => assert_eq!(failure.kind, FailureKind::ScopeViolation),
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn pause_node_honors_its_own_timeout_over_the_executor_default() {
        let mut registry = NodeRegistry::new();
        registry.register("pause", Arc::new(crate::handlers::PauseNodeHandler));

        let spec = GraphSpec {
            schema_version: 1,
            name: "pause-timeout".into(),
            entry: START.into(),
            nodes: vec![NodeSpec::new("p", NodeKind::Pause)
                .with_pause(PausePolicy::new("waiting").with_timeout_seconds(0))],
            edges: vec![
                Edge::Direct { from: START.into(), to: "p".into() },
                Edge::Direct { from: "p".into(), to: END.into() },
            ],
            terminal_nodes: vec![],
        };
        let graph = Graph::from_spec(spec).unwrap();
        let executor = base_executor(registry).with_pause_ttl(Duration::from_secs(3600));
        let outcome = executor.execute(&graph, Uuid::new_v4(), scope()).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Paused(_)));
    }

    #[tokio::test]
    async fn suspend_does_not_block_the_calling_task() {
        // Non-blocking suspend: execute() returns Paused immediately rather
        // than waiting out the pause's (very long) timeout.
        let mut registry = NodeRegistry::new();
        registry.register("pause", Arc::new(crate::handlers::PauseNodeHandler));

        let spec = GraphSpec {
            schema_version: 1,
            name: "pause-no-block".into(),
            entry: START.into(),
            nodes: vec![NodeSpec::new("p", NodeKind::Pause)
                .with_pause(PausePolicy::new("waiting").with_timeout_seconds(3600))],
            edges: vec![
                Edge::Direct { from: START.into(), to: "p".into() },
                Edge::Direct { from: "p".into(), to: END.into() },
            ],
            terminal_nodes: vec![],
        };
        let graph = Graph::from_spec(spec).unwrap();
        let executor = base_executor(registry);
        let outcome = tokio::time::timeout(Duration::from_secs(1), executor.execute(&graph, Uuid::new_v4(), scope()))
            .await
            .expect("execute() must not block while a node is paused")
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Paused(_)));
    }

    #[tokio::test]
    async fn resume_continues_past_the_pause_node_through_its_first_edge() {
        let mut registry = NodeRegistry::new();
        registry.register("pause", Arc::new(crate::handlers::PauseNodeHandler));
        registry.register("function", Arc::new(NoopSuccess));

        let spec = GraphSpec {
            schema_version: 1,
            name: "pause-resume".into(),
            entry: START.into(),
            nodes: vec![
                NodeSpec::new("p", NodeKind::Pause).with_pause(PausePolicy::new("waiting")),
                NodeSpec::new("after", NodeKind::Function { handler: "noop".into() }),
            ],
            edges: vec![
                Edge::Direct { from: START.into(), to: "p".into() },
                Edge::Direct { from: "p".into(), to: "after".into() },
                Edge::Direct { from: "after".into(), to: END.into() },
            ],
            terminal_nodes: vec!["after".into()],
        };
        let graph = Graph::from_spec(spec).unwrap();
        let executor = base_executor(registry);
        let execution_id = Uuid::new_v4();
        let outcome = executor.execute(&graph, execution_id, scope()).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Paused(_)));

        let outcome = executor.resume(&graph, execution_id, scope(), "p").await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed));
    }

    #[tokio::test]
    async fn validation_retries_with_feedback_before_failing() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct FlakyValidation {
            calls: AtomicUsize,
        }
        #[async_trait]
        impl NodeHandler for FlakyValidation {
            async fn run(&self, ctx: &NodeContext) -> NodeOutcome {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call == 0 {
                    assert!(ctx.feedback.is_none());
                    NodeOutcome::success(HashMap::new())
                } else {
                    assert!(ctx.feedback.is_some());
                    let mut writes = HashMap::new();
                    writes.insert("result".into(), serde_json::json!("ok"));
                    NodeOutcome::success(writes)
                }
            }
        }
        let mut registry = NodeRegistry::new();
        registry.register("function", Arc::new(FlakyValidation { calls: AtomicUsize::new(0) }));

        let spec = GraphSpec {
            schema_version: 1,
            name: "validated".into(),
            entry: START.into(),
            nodes: vec![NodeSpec::new("a", NodeKind::Function { handler: "noop".into() })
                .with_outputs(["result"])
                .with_validation(crate::graph::ValidationPolicy { max_retries: 1, schema: None })],
            edges: vec![
                Edge::Direct { from: START.into(), to: "a".into() },
                Edge::Direct { from: "a".into(), to: END.into() },
            ],
            terminal_nodes: vec!["a".into()],
        };
        let graph = Graph::from_spec(spec).unwrap();
        let executor = base_executor(registry);
        let outcome = executor.execute(&graph, Uuid::new_v4(), scope()).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed));
    }
}
