//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and get back one
//! reply: either a final answer or a list of tool calls. The same interface
//! serves the formatting pass by asking for a JSON-only response.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::ToolCall;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "openai/gpt-4o-mini")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Plain text, or constrained to a single JSON object
    #[serde(default)]
    pub response_format: ResponseFormat,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    /// A plain chat request with the default temperature and no tools.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
            tools: Vec::new(),
            response_format: ResponseFormat::Text,
        }
    }
}

/// What shape of output the model is asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    /// The formatting mode: the reply must be one JSON object.
    JsonObject,
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// One model turn, resolved into exactly one of two cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelReply {
    /// Terminal answer; no tools requested.
    Answer { content: String },

    /// The model wants these tools run before it continues.
    /// `content` carries any accompanying reasoning text.
    ToolCalls {
        #[serde(default)]
        content: String,
        calls: Vec<ToolCall>,
    },
}

impl ModelReply {
    /// Build a reply from raw parts; an empty call list means an answer.
    pub fn from_parts(content: String, calls: Vec<ToolCall>) -> Self {
        if calls.is_empty() {
            Self::Answer { content }
        } else {
            Self::ToolCalls { content, calls }
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Answer { content } | Self::ToolCalls { content, .. } => content,
        }
    }

    /// The assistant message to append to the conversation.
    pub fn to_message(&self) -> Message {
        match self {
            Self::Answer { content } => Message::assistant(content.clone()),
            Self::ToolCalls { content, calls } => {
                Message::assistant_with_tools(content.clone(), calls.clone())
            }
        }
    }
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The resolved reply
    pub reply: ModelReply,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Provider trait.
///
/// The agent loop calls `complete()` without knowing which backend is in
/// use. Formatting requests set `response_format = JsonObject` and expect
/// an `Answer` whose content is the JSON text.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Whether the provider is reachable.
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}
