//! Execution stream (C6): one admission queue and concurrency gate per
//! entry point. Grounded on `orchestrator::execution::workflow_engine::WorkflowExecutionEngine`
//! (an engine struct owning its config plus collaborators) and
//! `execution::streaming::ExecutionStreamHandler` (mpsc-based event
//! emission), generalized to the full admission → run → retain state
//! machine. The concurrency gate is a `tokio::sync::Semaphore` — the
//! teacher doesn't show one directly, but its async-first style and
//! `tokio::sync::mpsc` usage in `streaming.rs` make `Semaphore` the natural
//! extension of the same stack for bounding concurrent executions.

use crate::aggregator::OutcomeAggregator;
use crate::error::{Result, RuntimeError};
use crate::events::{Event, EventBus};
use crate::record::{ExecutionRecord, ExecutionStatus};
use crate::config::StreamConfig;
use dashmap::DashMap;
use runtime_graph::{ExecutionOutcome, ExecutionScope, Graph, GraphExecutor, PauseRegistry, SharedStateManager};
use runtime_trace::TraceStore;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Semaphore, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

pub struct ExecutionStream {
    pub id: String,
    graph: Arc<Graph>,
    config: StreamConfig,
    executor: Arc<GraphExecutor>,
    pause_registry: Arc<PauseRegistry>,
    scope_manager: Arc<SharedStateManager>,
    trace_store: Arc<dyn TraceStore>,
    event_bus: Arc<EventBus>,
    aggregator: Arc<OutcomeAggregator>,
    semaphore: Arc<Semaphore>,
    records: Arc<DashMap<Uuid, ExecutionRecord>>,
    handles: Arc<DashMap<Uuid, JoinHandle<()>>>,
    finished: Arc<Notify>,
}

impl ExecutionStream {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        graph: Arc<Graph>,
        config: StreamConfig,
        executor: Arc<GraphExecutor>,
        pause_registry: Arc<PauseRegistry>,
        scope_manager: Arc<SharedStateManager>,
        trace_store: Arc<dyn TraceStore>,
        event_bus: Arc<EventBus>,
        aggregator: Arc<OutcomeAggregator>,
    ) -> Self {
        let max_concurrency = config.max_concurrency;
        Self {
            id: id.into(),
            graph,
            config,
            executor,
            pause_registry,
            scope_manager,
            trace_store,
            event_bus,
            aggregator,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            records: Arc::new(DashMap::new()),
            handles: Arc::new(DashMap::new()),
            finished: Arc::new(Notify::new()),
        }
    }

    pub fn entry_node(&self) -> Result<String> {
        Ok(self.graph.real_entry().map_err(RuntimeError::from)?.clone())
    }

    pub fn concurrency_limit(&self) -> usize {
        self.config.max_concurrency
    }

    pub fn pending_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == ExecutionStatus::Pending)
            .count()
    }

    pub fn running_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.status, ExecutionStatus::Running | ExecutionStatus::Paused))
            .count()
    }

    pub fn record(&self, execution_id: Uuid) -> Result<ExecutionRecord> {
        self.records
            .get(&execution_id)
            .map(|r| r.clone())
            .ok_or(RuntimeError::ExecutionNotFound(execution_id))
    }

    /// Admit a new execution with `payload` as its trigger input. Rejects if
    /// the stream's queue is already at `max_queue_depth` pending+running
    /// executions, or if `payload` is missing a key the entry node declares
    /// as a required input (§4.6: validated at admission, before a task is
    /// even spawned).
    pub async fn trigger(&self, payload: Value) -> Result<Uuid> {
        if self.pending_count() + self.running_count() >= self.config.max_queue_depth {
            return Err(RuntimeError::AtCapacity(self.id.clone(), self.config.max_queue_depth));
        }

        let entry_id = self.graph.real_entry().map_err(RuntimeError::from)?.clone();
        if let Some(node) = self.graph.node(&entry_id) {
            for key in &node.inputs {
                if payload.get(key).is_none() {
                    return Err(RuntimeError::InvalidInput(self.graph.name.clone(), key.clone()));
                }
            }
        }

        let execution_id = Uuid::new_v4();
        let record = ExecutionRecord::new(execution_id, self.id.clone(), self.graph.name.clone(), payload.clone());
        self.records.insert(execution_id, record);
        self.event_bus.publish(Event::ExecutionAdmitted {
            execution_id,
            stream_id: self.id.clone(),
        });

        if let Some(obj) = payload.as_object() {
            for (key, value) in obj {
                self.scope_manager.set_private(&execution_id.to_string(), key, value.clone());
            }
        }

        let graph = self.graph.clone();
        let executor = self.executor.clone();
        let records = self.records.clone();
        let event_bus = self.event_bus.clone();
        let aggregator = self.aggregator.clone();
        let scope_manager = self.scope_manager.clone();
        let pause_registry = self.pause_registry.clone();
        let semaphore = self.semaphore.clone();
        let stream_id = self.id.clone();
        let finished = self.finished.clone();

        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire().await {
                Ok(p) => p,
                Err(_) => return,
            };

            if let Some(mut record) = records.get_mut(&execution_id) {
                let _ = record.transition(ExecutionStatus::Running);
            }
            event_bus.publish(Event::ExecutionStarted { execution_id, stream_id: stream_id.clone() });

            let scope = ExecutionScope {
                execution_id: execution_id.to_string(),
                stream_id: stream_id.clone(),
                runtime_id: "default".to_string(),
            };

            let outcome = executor.execute(&graph, execution_id, scope).await;
            finalize(
                execution_id, &stream_id, &records, &event_bus, &aggregator, &scope_manager,
                &pause_registry, outcome,
            )
            .await;
            finished.notify_waiters();
        });

        self.handles.insert(execution_id, handle);
        Ok(execution_id)
    }

    pub fn status(&self, execution_id: Uuid) -> Result<ExecutionStatus> {
        self.records
            .get(&execution_id)
            .map(|r| r.status)
            .ok_or(RuntimeError::ExecutionNotFound(execution_id))
    }

    /// Block until `execution_id` reaches a terminal or paused status.
    pub async fn wait(&self, execution_id: Uuid) -> Result<ExecutionStatus> {
        loop {
            let status = self.status(execution_id)?;
            if status.is_terminal() || status == ExecutionStatus::Paused {
                return Ok(status);
            }
            self.finished.notified().await;
        }
    }

    /// Force-abort every execution still `Running`/`Paused` on this stream,
    /// regardless of cooperative-cancellation checkpoints. Used by
    /// `AgentRuntime::stop` once the graceful-shutdown deadline has passed.
    pub async fn force_cancel_running(&self) -> usize {
        let ids: Vec<Uuid> = self
            .records
            .iter()
            .filter(|r| matches!(r.status, ExecutionStatus::Running | ExecutionStatus::Paused))
            .map(|r| *r.key())
            .collect();
        let mut cancelled = 0;
        for execution_id in ids {
            if self.cancel(execution_id).await.is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub async fn cancel(&self, execution_id: Uuid) -> Result<()> {
        if let Some((_, handle)) = self.handles.remove(&execution_id) {
            handle.abort();
        }
        if let Some(mut record) = self.records.get_mut(&execution_id) {
            if let Some(pause_id) = record.pause_token {
                let _ = self.pause_registry.cancel(pause_id).await;
            }
            let _ = record.transition(ExecutionStatus::Cancelled);
        } else {
            return Err(RuntimeError::ExecutionNotFound(execution_id));
        }
        self.scope_manager.clear_execution(&execution_id.to_string());
        self.aggregator.record_cancelled(&self.id);
        self.event_bus.publish(Event::ExecutionCancelled { execution_id, stream_id: self.id.clone() });
        self.finished.notify_waiters();
        Ok(())
    }

    /// Resume a paused execution with `payload`. Writes `payload` into the
    /// execution's private scope under the pause node's declared output keys
    /// (falling back to treating the whole payload as that single output's
    /// value, or spreading an object payload across undeclared keys when the
    /// pause node declares none), then re-enters the graph past the pause
    /// node in a freshly spawned task — the original `trigger()` task is long
    /// gone, since a pause never blocks it (§4.6).
    pub async fn resume(&self, execution_id: Uuid, payload: Value) -> Result<()> {
        let pause_id = {
            let record = self
                .records
                .get(&execution_id)
                .ok_or(RuntimeError::ExecutionNotFound(execution_id))?;
            if record.status != ExecutionStatus::Paused {
                return Err(RuntimeError::NotPaused(execution_id));
            }
            record.pause_token.ok_or(RuntimeError::NotPaused(execution_id))?
        };

        let token = self
            .pause_registry
            .get(pause_id)
            .await
            .ok_or(RuntimeError::NotPaused(execution_id))?;

        self.pause_registry.resume(pause_id, payload.clone()).await.map_err(|e| match e {
            runtime_graph::PauseError::AlreadyResumed(_) => RuntimeError::AlreadyResumed(execution_id),
            runtime_graph::PauseError::NotFound(_) => RuntimeError::NotPaused(execution_id),
            other => RuntimeError::Graph(runtime_graph::GraphError::from(other)),
        })?;

        let outputs: Vec<String> = self.graph.node(&token.node).map(|n| n.outputs.clone()).unwrap_or_default();
        if outputs.len() == 1 && payload.get(&outputs[0]).is_none() {
            self.scope_manager.set_private(&execution_id.to_string(), &outputs[0], payload.clone());
        } else if outputs.is_empty() {
            if let Some(obj) = payload.as_object() {
                for (key, value) in obj {
                    self.scope_manager.set_private(&execution_id.to_string(), key, value.clone());
                }
            }
        } else {
            for key in &outputs {
                if let Some(value) = payload.get(key) {
                    self.scope_manager.set_private(&execution_id.to_string(), key, value.clone());
                }
            }
        }

        if let Some(mut record) = self.records.get_mut(&execution_id) {
            let _ = record.transition(ExecutionStatus::Running);
        }
        self.event_bus.publish(Event::ExecutionResumed { execution_id, stream_id: self.id.clone() });

        let graph = self.graph.clone();
        let executor = self.executor.clone();
        let records = self.records.clone();
        let event_bus = self.event_bus.clone();
        let aggregator = self.aggregator.clone();
        let scope_manager = self.scope_manager.clone();
        let pause_registry = self.pause_registry.clone();
        let semaphore = self.semaphore.clone();
        let stream_id = self.id.clone();
        let finished = self.finished.clone();
        let node_id = token.node.clone();

        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire().await {
                Ok(p) => p,
                Err(_) => return,
            };
            let scope = ExecutionScope {
                execution_id: execution_id.to_string(),
                stream_id: stream_id.clone(),
                runtime_id: "default".to_string(),
            };
            let outcome = executor.resume(&graph, execution_id, scope, &node_id).await;
            finalize(
                execution_id, &stream_id, &records, &event_bus, &aggregator, &scope_manager,
                &pause_registry, outcome,
            )
            .await;
            finished.notify_waiters();
        });
        self.handles.insert(execution_id, handle);
        Ok(())
    }

    /// Fail every execution whose pause has exceeded its TTL with no
    /// `resume()` call. Called periodically by the runtime's background
    /// loop, at `RuntimeConfig::pause_sweep_interval`.
    pub async fn sweep_pause_timeouts(&self) -> usize {
        let expired = self.pause_registry.sweep_expired().await;
        let mut count = 0;
        for pause_id in expired {
            let found = self
                .records
                .iter()
                .find(|r| r.pause_token == Some(pause_id))
                .map(|r| (*r.key(), r.paused_node.clone().unwrap_or_default()));
            let Some((execution_id, node_id)) = found else { continue };

            let failure = self.executor.fail_pause_timeout(execution_id, &node_id).await;
            if let Some(mut record) = self.records.get_mut(&execution_id) {
                record.error = Some(failure);
                let _ = record.transition(ExecutionStatus::Failed);
            }
            self.scope_manager.clear_execution(&execution_id.to_string());
            self.aggregator.record_failed(&self.id);
            self.event_bus.publish(Event::ExecutionFailed {
                execution_id,
                stream_id: self.id.clone(),
                error: format!("pause on node '{node_id}' timed out"),
            });
            count += 1;
        }
        if count > 0 {
            self.finished.notify_waiters();
            info!(stream = %self.id, count, "pause-timeout sweep failed stale executions");
        }
        count
    }

    /// Apply the stream's retention policy to its trace store and to its own
    /// bookkeeping records, logging how many of each were pruned.
    pub async fn sweep_retention(&self) -> Result<usize> {
        let pruned = self
            .trace_store
            .prune(&self.id, self.config.retention)
            .await
            .map_err(runtime_graph::GraphError::from)?;
        if pruned > 0 {
            info!(stream = %self.id, pruned, "retention sweep pruned traces");
        }

        let ttl = chrono::Duration::from_std(self.config.retention.ttl).unwrap_or(chrono::Duration::zero());
        let cutoff = chrono::Utc::now() - ttl;
        let mut terminal: Vec<(Uuid, chrono::DateTime<chrono::Utc>)> = self
            .records
            .iter()
            .filter(|r| r.status.is_terminal())
            .map(|r| (*r.key(), r.updated_at))
            .collect();
        terminal.sort_by_key(|(_, updated_at)| std::cmp::Reverse(*updated_at));

        let mut record_prunes = 0;
        for (execution_id, updated_at) in terminal.iter().skip(self.config.retention.max_count) {
            self.records.remove(execution_id);
            record_prunes += 1;
            let _ = updated_at;
        }
        for (execution_id, updated_at) in &terminal {
            if *updated_at < cutoff && self.records.remove(execution_id).is_some() {
                record_prunes += 1;
            }
        }
        if record_prunes > 0 {
            info!(stream = %self.id, pruned = record_prunes, "retention sweep pruned execution records");
        }
        Ok(pruned)
    }
}

/// Shared between `trigger()`'s and `resume()`'s spawned tasks: turns a
/// completed `GraphExecutor` traversal into the aggregator/event-bus/record
/// side effects every run ends with. Takes its collaborators as loose
/// references rather than a borrowed `&ExecutionStream` since it runs inside
/// a `'static` spawned task that only cloned the individual `Arc` fields it
/// needs.
#[allow(clippy::too_many_arguments)]
async fn finalize(
    execution_id: Uuid,
    stream_id: &str,
    records: &DashMap<Uuid, ExecutionRecord>,
    event_bus: &EventBus,
    aggregator: &OutcomeAggregator,
    scope_manager: &SharedStateManager,
    pause_registry: &PauseRegistry,
    outcome: runtime_graph::Result<ExecutionOutcome>,
) {
    let status = match outcome {
        Ok(ExecutionOutcome::Completed) => {
            let result = serde_json::to_value(scope_manager.snapshot_private(&execution_id.to_string()))
                .unwrap_or(Value::Null);
            aggregator.record_completed(stream_id);
            event_bus.publish(Event::ExecutionCompleted {
                execution_id,
                stream_id: stream_id.to_string(),
                result: result.clone(),
            });
            if let Some(mut record) = records.get_mut(&execution_id) {
                record.result = Some(result);
            }
            scope_manager.clear_execution(&execution_id.to_string());
            ExecutionStatus::Completed
        }
        Ok(ExecutionOutcome::Failed(failure)) => {
            aggregator.record_failed(stream_id);
            event_bus.publish(Event::ExecutionFailed {
                execution_id,
                stream_id: stream_id.to_string(),
                error: failure.message.clone(),
            });
            if let Some(mut record) = records.get_mut(&execution_id) {
                record.error = Some(failure);
            }
            scope_manager.clear_execution(&execution_id.to_string());
            ExecutionStatus::Failed
        }
        Ok(ExecutionOutcome::Paused(pause_id)) => {
            aggregator.record_paused(stream_id);
            let node = pause_registry.get(pause_id).await.map(|t| t.node).unwrap_or_default();
            if let Some(mut record) = records.get_mut(&execution_id) {
                record.pause_token = Some(pause_id);
                record.paused_node = Some(node.clone());
            }
            event_bus.publish(Event::ExecutionPaused {
                execution_id,
                stream_id: stream_id.to_string(),
                node,
                pause_id,
            });
            ExecutionStatus::Paused
        }
        Err(error) => {
            aggregator.record_failed(stream_id);
            event_bus.publish(Event::ExecutionFailed {
                execution_id,
                stream_id: stream_id.to_string(),
                error: error.to_string(),
            });
            warn!(%execution_id, %error, "execution errored");
            scope_manager.clear_execution(&execution_id.to_string());
            ExecutionStatus::Failed
        }
    };

    if let Some(mut record) = records.get_mut(&execution_id) {
        let _ = record.transition(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use async_trait::async_trait;
    use runtime_graph::{
        Edge, GraphSpec, NodeContext, NodeHandler, NodeKind, NodeOutcome, NodeRegistry, PausePolicy, NodeSpec,
        END, START,
    };
    use runtime_trace::{InMemoryTraceStore, NullHooks};
    use std::collections::HashMap;

    struct Echo;

    #[async_trait]
    impl NodeHandler for Echo {
        async fn run(&self, ctx: &NodeContext) -> NodeOutcome {
            let mut writes = HashMap::new();
            writes.insert("greeting".to_string(), ctx.reads.get("name").cloned().unwrap_or(Value::Null));
            NodeOutcome::success(writes)
        }
    }

    fn make_stream(graph: Graph) -> ExecutionStream {
        let mut registry = NodeRegistry::new();
        registry.register("function", Arc::new(Echo));
        registry.register("pause", Arc::new(runtime_graph::PauseNodeHandler));
        let scope_manager = Arc::new(SharedStateManager::new());
        let pause_registry = Arc::new(PauseRegistry::new());
        let executor = Arc::new(GraphExecutor::new(
            Arc::new(registry),
            scope_manager.clone(),
            pause_registry.clone(),
            Arc::new(NullHooks),
        ));
        ExecutionStream::new(
            "s",
            Arc::new(graph),
            StreamConfig::new(),
            executor,
            pause_registry,
            scope_manager,
            Arc::new(InMemoryTraceStore::new()),
            Arc::new(EventBus::new(64)),
            Arc::new(OutcomeAggregator::new()),
        )
    }

    fn echo_graph() -> Graph {
        let spec = GraphSpec {
            schema_version: 1,
            name: "echo".into(),
            entry: START.into(),
            nodes: vec![NodeSpec::new("a", NodeKind::Function { handler: "noop".into() })
                .with_inputs(["name"])
                .with_outputs(["greeting"])],
            edges: vec![
                Edge::Direct { from: START.into(), to: "a".into() },
                Edge::Direct { from: "a".into(), to: END.into() },
            ],
            terminal_nodes: vec!["a".into()],
        };
        Graph::from_spec(spec).unwrap()
    }

    #[tokio::test]
    async fn trigger_rejects_a_payload_missing_a_declared_input() {
        let stream = make_stream(echo_graph());
        let err = stream.trigger(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidInput(_, _)));
    }

    #[tokio::test]
    async fn trigger_runs_to_completion_with_the_payload_as_private_state() {
        let stream = make_stream(echo_graph());
        let execution_id = stream.trigger(serde_json::json!({"name": "ada"})).await.unwrap();
        let status = stream.wait(execution_id).await.unwrap();
        assert_eq!(status, ExecutionStatus::Completed);
        let record = stream.record(execution_id).unwrap();
        assert_eq!(record.result.unwrap()["greeting"], serde_json::json!("ada"));
    }

    fn pause_graph() -> Graph {
        let spec = GraphSpec {
            schema_version: 1,
            name: "approval".into(),
            entry: START.into(),
            nodes: vec![
                NodeSpec::new("p", NodeKind::Pause).with_pause(PausePolicy::new("awaiting approval")),
                NodeSpec::new("after", NodeKind::Function { handler: "noop".into() }).with_inputs(["name"]).with_outputs(["greeting"]),
            ],
            edges: vec![
                Edge::Direct { from: START.into(), to: "p".into() },
                Edge::Direct { from: "p".into(), to: "after".into() },
                Edge::Direct { from: "after".into(), to: END.into() },
            ],
            terminal_nodes: vec!["after".into()],
        };
        Graph::from_spec(spec).unwrap()
    }

    #[tokio::test]
    async fn resume_writes_the_payload_and_continues_the_graph() {
        let stream = make_stream(pause_graph());
        let execution_id = stream.trigger(serde_json::json!({})).await.unwrap();
        let status = stream.wait(execution_id).await.unwrap();
        assert_eq!(status, ExecutionStatus::Paused);

        stream.resume(execution_id, serde_json::json!({"name": "grace"})).await.unwrap();
        let status = stream.wait(execution_id).await.unwrap();
        assert_eq!(status, ExecutionStatus::Completed);
        let record = stream.record(execution_id).unwrap();
        assert_eq!(record.result.unwrap()["greeting"], serde_json::json!("grace"));
    }

    #[tokio::test]
    async fn resuming_an_execution_that_is_not_paused_fails() {
        let stream = make_stream(echo_graph());
        let execution_id = stream.trigger(serde_json::json!({"name": "ada"})).await.unwrap();
        stream.wait(execution_id).await.unwrap();
        let err = stream.resume(execution_id, serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotPaused(_)));
    }
}
