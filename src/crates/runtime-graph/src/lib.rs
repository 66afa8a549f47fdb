//! Graph model, shared-state manager, node registry, and executor for the
//! agent execution runtime.
//!
//! This crate owns everything that runs *inside* one execution: a [`Graph`]
//! is a validated, immutable document of [`node::NodeKind`]s and [`graph::Edge`]s;
//! a [`scope::SharedStateManager`] holds the three isolation levels nodes read
//! and write through; an [`executor::GraphExecutor`] drives one execution
//! from its entry point to completion, failure, or pause, reporting every
//! decision through the [`runtime_trace::ExecutorHooks`] interface so tracing
//! never has to reach back into the loop.
//!
//! Generalized from the teacher's `langgraph-core` crate (Pregel-style
//! supersteps, retry policies, human-in-the-loop interrupts) into a fixed
//! five-kind node model with an explicit shared-state scope instead of an
//! open-ended channel/reducer system built for arbitrary chat state.

pub mod error;
pub mod executor;
pub mod expr;
pub mod graph;
pub mod handlers;
pub mod node;
pub mod pause;
pub mod retry;
pub mod scope;
pub mod visualization;

pub use error::{GraphError, Result};
pub use executor::{ExecutionOutcome, GraphExecutor};
pub use expr::{Check, Condition, Evaluator, ExprError};
pub use graph::{Edge, Graph, GraphSpec, NodeSpec, PausePolicy, ValidationPolicy, END, START};
pub use handlers::{
    FunctionNodeHandler, LlmNodeHandler, PauseNodeHandler, RouterNodeHandler, SubagentNodeHandler,
};
pub use node::{NodeContext, NodeHandler, NodeId, NodeKind, NodeOutcome, NodeRegistry};
pub use pause::{PauseError, PauseRegistry, PauseToken};
pub use retry::{RetryPolicy, RetryState};
pub use scope::{ExecutionScope, ScopeError, ScopeLevel, SharedStateManager};
pub use visualization::{VisualizationFormat, VisualizationOptions, visualize};
