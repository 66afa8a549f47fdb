//! The executor hook interface: how `runtime-graph`'s executor reports node
//! dispatch decisions to a trace collector without depending on it directly.
//!
//! `runtime-graph` depends on `runtime-trace` (not the reverse), so the
//! executor is generic over this trait instead of calling back into a
//! concrete collector type. Generalized from `CheckpointSaver` (`traits.rs`
//! in the teacher crate) the same way: an async trait with a default-free
//! method set an implementor must provide, dispatched by reference so the
//! executor never owns the hook.

use crate::trace::{Decision, TraceStatus};
use async_trait::async_trait;

/// Called by the graph executor as a graph runs. Implemented by
/// [`crate::collector::TraceCollector`]; tests can stub it out with a no-op.
#[async_trait]
pub trait ExecutorHooks: Send + Sync {
    /// Called once before the first node of an execution (or a resume after
    /// pause) dispatches. Idempotent: a resume calls this again for the same
    /// `execution_id` and must not reset decisions already recorded.
    async fn on_start(&self, execution_id: uuid::Uuid, stream_id: String, graph_name: String);
    async fn on_decision(&self, execution_id: uuid::Uuid, decision: Decision);
    async fn on_finish(&self, execution_id: uuid::Uuid, status: TraceStatus);
}

/// A hook implementation that discards everything; used where no trace
/// collector is wired up (e.g. unit tests of the executor itself).
pub struct NullHooks;

#[async_trait]
impl ExecutorHooks for NullHooks {
    async fn on_start(&self, _execution_id: uuid::Uuid, _stream_id: String, _graph_name: String) {}
    async fn on_decision(&self, _execution_id: uuid::Uuid, _decision: Decision) {}
    async fn on_finish(&self, _execution_id: uuid::Uuid, _status: TraceStatus) {}
}
