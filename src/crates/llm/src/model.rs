//! `ChatModel`: the trait a `Llm` node's handler dispatches to. Grounded on
//! `langgraph_core::llm::traits::ChatModel` in the teacher crate — an
//! async, provider-agnostic surface the orchestration core never implements
//! itself, only calls through `Arc<dyn ChatModel>`.

use crate::config::ChatRequest;
use crate::error::Result;
use crate::response::{ChatResponse, ChatStreamResponse};
use crate::tools::ToolDefinition;
use async_trait::async_trait;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a complete chat response for `request`.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Stream a chat response token by token.
    async fn stream(&self, request: ChatRequest) -> Result<ChatStreamResponse>;

    /// Check whether the provider is reachable. Defaults to `true`; local
    /// providers override this to probe a health endpoint.
    async fn is_available(&self) -> Result<bool> {
        Ok(true)
    }

    /// Tools bound to this model, if it supports function calling.
    fn bound_tools(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::response::UsageMetadata;
    use std::sync::Arc;

    #[derive(Clone)]
    struct MockModel {
        response_text: String,
    }

    #[async_trait]
    impl ChatModel for MockModel {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse {
                message: Message::assistant(self.response_text.clone()),
                usage: Some(UsageMetadata {
                    input_tokens: 10,
                    output_tokens: 5,
                    reasoning_tokens: None,
                    total_tokens: 15,
                }),
                reasoning: None,
                metadata: Default::default(),
            })
        }

        async fn stream(&self, _request: ChatRequest) -> Result<ChatStreamResponse> {
            unimplemented!("mock model does not stream")
        }
    }

    #[tokio::test]
    async fn trait_object_dispatches_through_arc() {
        let model: Arc<dyn ChatModel> = Arc::new(MockModel { response_text: "hello".into() });
        let response = model.chat(ChatRequest::new(vec![Message::human("hi")])).await.unwrap();
        assert_eq!(response.message.content, "hello");
    }

    #[tokio::test]
    async fn default_is_available_is_true() {
        let model = MockModel { response_text: "x".into() };
        assert!(model.is_available().await.unwrap());
    }
}
