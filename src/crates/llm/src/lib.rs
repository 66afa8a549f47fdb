//! The external LLM collaborator trait. A `Llm` node in `runtime-graph`
//! dispatches to `Arc<dyn ChatModel>`; this crate defines that trait plus
//! its request/response types and nothing else — no HTTP client, no
//! concrete provider. Generalized from the teacher's `langgraph-core::llm`
//! module, which already drew this boundary (trait lives in core, provider
//! implementations live downstream).

pub mod config;
pub mod error;
pub mod message;
pub mod model;
pub mod response;
pub mod tools;

pub use config::{ChatConfig, ChatRequest, ReasoningMode};
pub use error::{LlmError, Result};
pub use message::{Message, MessageRole};
pub use model::ChatModel;
pub use response::{ChatResponse, ChatStreamResponse, MessageChunk, ReasoningContent, TokenStream, UsageMetadata};
pub use tools::{ToolCall, ToolDefinition, ToolResult};
