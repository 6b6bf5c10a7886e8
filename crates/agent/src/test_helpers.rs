//! Shared test helpers for agent tests.

use async_trait::async_trait;
use quarry_core::error::{ProviderError, ToolError};
use quarry_core::provider::{ModelReply, Provider, ProviderRequest, ProviderResponse, Usage};
use quarry_core::tool::{Tool, ToolCall};
use std::sync::Mutex;
use std::time::Duration;

/// A mock provider that returns a sequence of scripted outcomes.
///
/// Each call to `complete` returns the next entry in the queue.
/// Panics if more calls are made than entries provided.
pub struct SequentialMockProvider {
    outcomes: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    latency: Option<Duration>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    pub fn scripted(outcomes: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            requests: Mutex::new(Vec::new()),
            latency: None,
        }
    }

    /// Delay every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            panic!("SequentialMockProvider: no more responses (call #{call})");
        }
        outcomes.remove(0)
    }
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        reply: ModelReply::Answer {
            content: text.into(),
        },
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Create a response with tool calls and optional thought content.
pub fn make_tool_call_response(calls: Vec<ToolCall>, thought: &str) -> ProviderResponse {
    ProviderResponse {
        reply: ModelReply::ToolCalls {
            content: thought.into(),
            calls,
        },
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Helper to create a tool call.
pub fn make_tool_call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments: args,
    }
}

/// Returns `{"symbol": .., "price_usd": ..}` after an optional delay.
pub struct StubPriceTool {
    pub price: f64,
    pub delay: Duration,
}

#[async_trait]
impl Tool for StubPriceTool {
    fn name(&self) -> &str {
        "get_price"
    }

    fn description(&self) -> &str {
        "Spot price for a symbol"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "symbol": { "type": "string" } },
            "required": ["symbol"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(serde_json::json!({
            "symbol": arguments["symbol"],
            "price_usd": self.price
        })
        .to_string())
    }
}
