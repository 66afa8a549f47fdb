//! `ChatRequest`/`ChatConfig`: the request-side input to [`crate::model::ChatModel`],
//! grounded on `langgraph_core::llm::config` in the teacher crate with the
//! builder-method surface kept intact.

use crate::message::Message;
use crate::tools::ToolDefinition;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub config: ChatConfig,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages, config: ChatConfig::default() }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.config.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_reasoning(mut self, mode: ReasoningMode) -> Self {
        self.config.reasoning_mode = mode;
        self
    }

    pub fn with_stop_sequences(mut self, sequences: Vec<String>) -> Self {
        self.config.stop_sequences = sequences;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.config.tools = tools;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatConfig {
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub reasoning_mode: ReasoningMode,
    pub stop_sequences: Vec<String>,
    pub tools: Vec<ToolDefinition>,
}

/// Controls how a thinking model's reasoning content surfaces in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMode {
    Disabled,
    #[default]
    Default,
    Separated,
    Extended,
}

impl ReasoningMode {
    pub fn should_capture(&self) -> bool {
        matches!(self, ReasoningMode::Separated | ReasoningMode::Extended)
    }
}
