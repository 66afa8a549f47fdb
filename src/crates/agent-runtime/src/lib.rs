//! Composition root for the agent execution runtime: execution streams,
//! the outcome aggregator, the event bus, and [`runtime::AgentRuntime`]
//! itself, which wires a [`runtime_graph::GraphExecutor`] and a
//! [`runtime_trace::TraceCollector`] into each registered stream.
//!
//! `runtime-graph` owns what happens *inside* one execution (the graph,
//! shared state, node dispatch); `runtime-trace` owns how an execution's
//! decisions are recorded; this crate owns admission, concurrency, pause
//! lifecycle wiring, and fan-out to subscribers — the same layering the
//! teacher draws between `langgraph-core`, `langgraph-checkpoint`, and its
//! own `orchestrator` crate.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod events;
pub mod record;
pub mod runtime;
pub mod stream;

pub use aggregator::{OutcomeAggregator, StreamOutcomeSummary};
pub use config::{RuntimeConfig, StreamConfig};
pub use error::{Result, RuntimeError};
pub use events::{Envelope, Event, EventBus, EventFilter, EventPublishingHooks};
pub use record::{ExecutionRecord, ExecutionStatus};
pub use runtime::{AgentRuntime, StreamInfo};
pub use stream::ExecutionStream;
