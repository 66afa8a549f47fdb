//! `TraceCollector`: wraps a graph execution by implementing [`ExecutorHooks`]
//! explicitly, rather than monkey-patching the executor. Each execution gets
//! its own in-progress [`Trace`] keyed by execution id; `on_finish` flushes it
//! to the configured [`TraceStore`] and drops the in-progress entry.

use crate::error::Result;
use crate::hooks::ExecutorHooks;
use crate::store::TraceStore;
use crate::trace::{Decision, Trace, TraceStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct TraceCollector {
    store: Arc<dyn TraceStore>,
    in_progress: DashMap<Uuid, Trace>,
}

impl TraceCollector {
    pub fn new(store: Arc<dyn TraceStore>) -> Self {
        Self {
            store,
            in_progress: DashMap::new(),
        }
    }

    /// Register a new execution before the first node runs. Idempotent: a
    /// resumed execution calls this again and must not clobber decisions
    /// already recorded for it.
    pub fn begin(&self, execution_id: Uuid, stream_id: impl Into<String>, graph_name: impl Into<String>) {
        self.in_progress
            .entry(execution_id)
            .or_insert_with(|| Trace::new(execution_id, stream_id, graph_name));
    }

    pub async fn get(&self, stream_id: &str, execution_id: Uuid) -> Result<Option<Trace>> {
        if let Some(trace) = self.in_progress.get(&execution_id) {
            return Ok(Some(trace.clone()));
        }
        self.store.get(stream_id, execution_id).await
    }
}

#[async_trait]
impl ExecutorHooks for TraceCollector {
    async fn on_start(&self, execution_id: Uuid, stream_id: String, graph_name: String) {
        self.begin(execution_id, stream_id, graph_name);
    }

    async fn on_decision(&self, execution_id: Uuid, decision: Decision) {
        match self.in_progress.get_mut(&execution_id) {
            Some(mut trace) => trace.record(decision),
            None => warn!(%execution_id, "decision recorded for unknown execution, dropping"),
        }
    }

    async fn on_finish(&self, execution_id: Uuid, status: TraceStatus) {
        let Some((_, mut trace)) = self.in_progress.remove(&execution_id) else {
            warn!(%execution_id, "finish recorded for unknown execution, dropping");
            return;
        };
        trace.finish(status);
        if let Err(error) = self.store.put(&trace).await {
            warn!(%execution_id, %error, "failed to persist trace");
        } else {
            debug!(%execution_id, steps = trace.decisions.len(), "trace flushed");
        }
    }
}
