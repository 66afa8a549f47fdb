//! Trace collection and storage for the agent execution runtime.
//!
//! Every graph execution produces a [`trace::Trace`]: an ordered list of
//! per-node [`trace::Decision`]s plus a terminal [`trace::TraceStatus`]. The
//! executor in `runtime-graph` never writes a trace directly — it reports
//! through the [`hooks::ExecutorHooks`] trait, and [`collector::TraceCollector`]
//! is the concrete implementation that accumulates decisions and flushes the
//! finished trace to a [`store::TraceStore`].
//!
//! This mirrors the teacher's checkpoint crate (`CheckpointSaver` trait,
//! `InMemoryCheckpointSaver`, JSON serialization) adapted from incremental
//! state snapshots to a single append-only trace document per execution.

pub mod collector;
pub mod error;
pub mod hooks;
pub mod store;
pub mod trace;

pub use collector::TraceCollector;
pub use error::{Result, TraceError};
pub use hooks::{ExecutorHooks, NullHooks};
pub use store::{FileTraceStore, InMemoryTraceStore, RetentionPolicy, TraceStore};
pub use trace::{Decision, DecisionOutcome, Trace, TraceStatus, TraceSummary};
