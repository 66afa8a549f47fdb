//! Response-side types returned from [`crate::model::ChatModel`].

use crate::message::Message;
use futures::stream::Stream;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;

#[derive(Debug, Clone)]
pub struct UsageMetadata {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: Option<u64>,
    pub total_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct ReasoningContent {
    pub content: String,
    pub tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: Option<UsageMetadata>,
    pub reasoning: Option<ReasoningContent>,
    pub metadata: HashMap<String, Value>,
}

/// A chunk of a streaming response.
#[derive(Debug, Clone)]
pub struct MessageChunk {
    pub content: String,
    pub message_id: Option<String>,
    pub is_final: bool,
}

pub type TokenStream = Pin<Box<dyn Stream<Item = MessageChunk> + Send>>;

pub struct ChatStreamResponse {
    pub stream: TokenStream,
    pub reasoning_stream: Option<TokenStream>,
}
