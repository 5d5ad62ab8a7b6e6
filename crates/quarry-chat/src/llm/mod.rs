//! Generation-service client abstraction.
//!
//! The orchestrator consumes a closed set of stream events and never sees
//! the transport. `OpenAiClient` is the production implementation; tests
//! inject scripted fakes through the same trait.

mod decoder;
mod openai;

pub use decoder::StreamDecoder;
pub use openai::OpenAiClient;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use quarry_core::types::{Message, ToolCall};

use crate::error::ChatError;

/// Whether the model may call tools on this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    None,
}

impl ToolChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolChoice::Auto => "auto",
            ToolChoice::None => "none",
        }
    }
}

/// One request to the generation service.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub temperature: f32,
    pub messages: Vec<Message>,
    /// Function definitions in the chat-completions `tools` format.
    pub tools: Vec<Value>,
    pub tool_choice: ToolChoice,
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, temperature: f32, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            temperature,
            messages,
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
            max_tokens: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Value>, choice: ToolChoice) -> Self {
        self.tools = tools;
        self.tool_choice = choice;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Events produced while a response streams in, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A fragment of assistant text.
    Token(String),
    /// Tool calls the model issued together. Ends the current stream.
    ToolCallBatch(Vec<ToolCall>),
    /// The model finished without requesting tools.
    Completion,
}

/// Result of a non-streaming request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

pub type EventStream = BoxStream<'static, Result<StreamEvent, ChatError>>;

/// A chat-completions style text generation service.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Start a streaming response.
    async fn stream_chat(&self, request: GenerationRequest) -> Result<EventStream, ChatError>;

    /// Run a request to completion and return the final message.
    async fn complete(&self, request: GenerationRequest) -> Result<Completion, ChatError>;
}
