//! The external tool collaborator trait. A `Subagent` or `Function` node's
//! handler dispatches a [`tool::ToolCall`] through a [`registry::ToolRegistry`]
//! to a registered `Arc<dyn Tool>`; this crate defines that trait and
//! registry and nothing else — no concrete tool, no process sandboxing.
//! Generalized from the teacher's tool-execution module the same way
//! `llm` generalizes `langgraph-core::llm`: the trait stays, the provider
//! moves downstream.

pub mod error;
pub mod registry;
pub mod tool;

pub use error::{Result, ToolingError};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolCall, ToolCallResult};
