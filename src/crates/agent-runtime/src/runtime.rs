//! Agent runtime (C8): the composition root. Grounded on
//! `WorkflowExecutionEngine::new`/`with_*` builder style and the teacher's
//! `bin/orchestrator-server.rs` construct → start → stop sequencing
//! (logging init, then collaborators, then serve).

use crate::aggregator::OutcomeAggregator;
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::events::{EventBus, EventFilter};
use crate::record::{ExecutionRecord, ExecutionStatus};
use crate::stream::ExecutionStream;
use dashmap::DashMap;
use runtime_graph::{GraphExecutor, NodeRegistry, PauseRegistry, SharedStateManager};
use runtime_trace::{ExecutorHooks, FileTraceStore, TraceCollector, TraceStore};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub id: String,
    pub entry_node: String,
    pub concurrency_limit: usize,
    pub pending_count: usize,
    pub running_count: usize,
}

/// Owns every execution stream the runtime serves, the shared-state
/// manager, the event bus, and the outcome aggregator. Construct once per
/// process; `start()`/`stop()` bracket its background retention sweeper.
pub struct AgentRuntime {
    config: RuntimeConfig,
    registry: Arc<NodeRegistry>,
    scope_manager: Arc<SharedStateManager>,
    pause_registry: Arc<PauseRegistry>,
    trace_store: Arc<dyn TraceStore>,
    collector: Arc<TraceCollector>,
    event_bus: Arc<EventBus>,
    aggregator: Arc<OutcomeAggregator>,
    streams: DashMap<String, Arc<ExecutionStream>>,
    running: AtomicBool,
    shutdown: Arc<tokio::sync::Notify>,
}

impl AgentRuntime {
    pub fn new(config: RuntimeConfig, registry: NodeRegistry) -> Self {
        let trace_store: Arc<dyn TraceStore> =
            Arc::new(FileTraceStore::new(config.storage_root.clone()));
        let collector = Arc::new(TraceCollector::new(trace_store.clone()));
        Self {
            event_bus: Arc::new(EventBus::new(config.event_bus_queue_depth)),
            aggregator: Arc::new(OutcomeAggregator::new()),
            scope_manager: Arc::new(SharedStateManager::new()),
            pause_registry: Arc::new(PauseRegistry::new()),
            registry: Arc::new(registry),
            trace_store,
            collector,
            config,
            streams: DashMap::new(),
            running: AtomicBool::new(false),
            shutdown: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Register an execution stream for `graph`, keyed by entry point id.
    pub fn register_stream(&self, stream_id: impl Into<String>, graph: Arc<runtime_graph::Graph>) -> Arc<ExecutionStream> {
        let stream_id = stream_id.into();
        let hooks: Arc<dyn ExecutorHooks> = Arc::new(crate::events::EventPublishingHooks::new(
            self.collector.clone(),
            self.event_bus.clone(),
            stream_id.clone(),
        ));
        let executor = Arc::new(
            GraphExecutor::new(
                self.registry.clone(),
                self.scope_manager.clone(),
                self.pause_registry.clone(),
                hooks,
            )
            .with_retry_policy(self.config.default_stream.retry.clone())
            .with_pause_ttl(self.config.default_stream.pause_ttl),
        );
        let stream = Arc::new(ExecutionStream::new(
            stream_id.clone(),
            graph,
            self.config.default_stream.clone(),
            executor,
            self.pause_registry.clone(),
            self.scope_manager.clone(),
            self.trace_store.clone(),
            self.event_bus.clone(),
            self.aggregator.clone(),
        ));
        self.streams.insert(stream_id, stream.clone());
        stream
    }

    fn stream(&self, stream_id: &str) -> Result<Arc<ExecutionStream>> {
        self.streams
            .get(stream_id)
            .map(|s| s.clone())
            .ok_or_else(|| RuntimeError::StreamNotFound(stream_id.to_string()))
    }

    pub async fn trigger(&self, stream_id: &str, payload: Value) -> Result<Uuid> {
        if !self.running.load(Ordering::Acquire) {
            return Err(RuntimeError::ShuttingDown);
        }
        self.stream(stream_id)?.trigger(payload).await
    }

    /// Trigger and block until the execution reaches a terminal or paused
    /// status, or `timeout` elapses first (`RuntimeError::Timeout` in that
    /// case; the execution itself keeps running).
    pub async fn trigger_and_wait(
        &self,
        stream_id: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<ExecutionStatus> {
        let execution_id = self.trigger(stream_id, payload).await?;
        let stream = self.stream(stream_id)?;
        match timeout {
            Some(duration) => tokio::time::timeout(duration, stream.wait(execution_id))
                .await
                .map_err(|_| RuntimeError::Timeout(duration))?,
            None => stream.wait(execution_id).await,
        }
    }

    pub async fn cancel(&self, stream_id: &str, execution_id: Uuid) -> Result<()> {
        self.stream(stream_id)?.cancel(execution_id).await
    }

    pub async fn resume(&self, stream_id: &str, execution_id: Uuid, value: Value) -> Result<()> {
        self.stream(stream_id)?.resume(execution_id, value).await
    }

    pub fn subscribe(&self, filter: EventFilter) -> (Uuid, mpsc::Receiver<crate::events::Envelope>) {
        self.event_bus.subscribe(filter)
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.event_bus.unsubscribe(id);
    }

    pub async fn get_trace(&self, stream_id: &str, execution_id: Uuid) -> Result<Option<runtime_trace::Trace>> {
        self.collector
            .get(stream_id, execution_id)
            .await
            .map_err(runtime_graph::GraphError::from)
            .map_err(RuntimeError::from)
    }

    /// The runtime's own bookkeeping record for one execution: its status,
    /// trigger payload, and (once terminal) its result or error. Distinct
    /// from `get_trace`, which returns the step-by-step decision log.
    pub fn get_result(&self, stream_id: &str, execution_id: Uuid) -> Result<ExecutionRecord> {
        self.stream(stream_id)?.record(execution_id)
    }

    pub fn list_streams(&self) -> Vec<StreamInfo> {
        self.streams
            .iter()
            .map(|entry| StreamInfo {
                id: entry.id.clone(),
                entry_node: entry.entry_node().unwrap_or_default(),
                concurrency_limit: entry.concurrency_limit(),
                pending_count: entry.pending_count(),
                running_count: entry.running_count(),
            })
            .collect()
    }

    /// Spawn the background retention and pause-timeout sweepers. Idempotent:
    /// calling twice without an intervening `stop()` is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("agent runtime starting");
        let this = self.clone();
        tokio::spawn(async move {
            let mut retention_interval = tokio::time::interval(this.config.retention_sweep_interval);
            let mut pause_interval = tokio::time::interval(this.config.pause_sweep_interval);
            loop {
                tokio::select! {
                    _ = retention_interval.tick() => {
                        for stream in this.streams.iter() {
                            if let Err(error) = stream.sweep_retention().await {
                                warn!(stream = %stream.id, %error, "retention sweep failed");
                            }
                        }
                    }
                    _ = pause_interval.tick() => {
                        for stream in this.streams.iter() {
                            stream.sweep_pause_timeouts().await;
                        }
                    }
                    _ = this.shutdown.notified() => break,
                }
            }
        });
    }

    /// Stop admitting new executions and wait up to `shutdown_deadline` for
    /// in-flight executions across every stream to drain. Anything still
    /// running once the deadline passes is force-cancelled (§4.8) rather
    /// than left dangling.
    pub async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        self.shutdown.notify_waiters();

        let deadline = tokio::time::Instant::now() + self.config.shutdown_deadline;
        loop {
            let still_running: usize = self.streams.iter().map(|s| s.running_count()).sum();
            if still_running == 0 {
                info!("agent runtime stopped cleanly");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                let mut force_cancelled = 0;
                for stream in self.streams.iter() {
                    force_cancelled += stream.force_cancel_running().await;
                }
                warn!(
                    force_cancelled,
                    "shutdown deadline exceeded; force-cancelled remaining executions"
                );
                return Err(RuntimeError::ShutdownDeadlineExceeded(force_cancelled));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
