//! Tool dispatcher — turns model-issued calls into tool results.
//!
//! Dispatch is total: an unknown tool, invalid arguments, a tool error, a
//! timeout or a panic all come back as an error [`ToolResult`] the model can
//! read and recover from. Nothing propagates into the loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::join_all;
use quarry_core::error::ToolError;
use quarry_core::event::{DomainEvent, EventBus};
use quarry_core::schema;
use quarry_core::tool::{ToolCall, ToolRegistry, ToolResult};
use serde_json::Value;
use tracing::{debug, warn};

/// Longest error payload handed back to the model.
const MAX_ERROR_PAYLOAD: usize = 512;

pub struct Dispatcher {
    tools: Arc<ToolRegistry>,
    timeout: Duration,
    event_bus: Arc<EventBus>,
}

impl Dispatcher {
    pub fn new(tools: Arc<ToolRegistry>, event_bus: Arc<EventBus>) -> Self {
        Self {
            tools,
            timeout: Duration::from_secs(60),
            event_bus,
        }
    }

    /// Set the per-call execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Execute one call. Never fails.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();
        let outcome = self.execute(call).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        self.event_bus.publish(DomainEvent::ToolExecuted {
            tool_name: call.name.clone(),
            success: outcome.is_ok(),
            duration_ms,
            timestamp: chrono::Utc::now(),
        });

        match outcome {
            Ok(payload) => {
                debug!(tool = %call.name, call_id = %call.id, duration_ms, "Tool succeeded");
                ToolResult::success(&call.id, payload)
            }
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Tool failed");
                ToolResult::error(&call.id, sanitize(&e.to_string()))
            }
        }
    }

    /// Execute all calls of one turn concurrently. Results come back in
    /// call order whatever order they complete in.
    pub async fn dispatch_all(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        debug!(count = calls.len(), "Dispatching tool calls");
        join_all(calls.iter().map(|call| self.dispatch(call))).await
    }

    async fn execute(&self, call: &ToolCall) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        let arguments = normalize_arguments(&call.arguments)?;
        schema::validate(&arguments, &tool.parameters_schema())
            .map_err(ToolError::InvalidArguments)?;

        let guarded = AssertUnwindSafe(tool.execute(arguments)).catch_unwind();
        match tokio::time::timeout(self.timeout, guarded).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(ToolError::ExecutionFailed {
                tool_name: call.name.clone(),
                reason: format!("tool panicked: {}", panic_message(panic.as_ref())),
            }),
            Err(_) => Err(ToolError::Timeout {
                tool_name: call.name.clone(),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }
}

/// Arguments arrive as a JSON object, or as JSON text when the provider
/// could not decode them. Anything else is rejected.
fn normalize_arguments(arguments: &Value) -> Result<Value, ToolError> {
    let value = match arguments {
        Value::String(raw) => serde_json::from_str(raw).map_err(|e| {
            ToolError::InvalidArguments(format!("arguments are not valid JSON: {e}"))
        })?,
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };

    if value.is_object() {
        Ok(value)
    } else {
        Err(ToolError::InvalidArguments(
            "$: expected an object of named arguments".into(),
        ))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Single line, bounded length.
fn sanitize(message: &str) -> String {
    let line = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() <= MAX_ERROR_PAYLOAD {
        return line;
    }
    let mut cut: String = line.chars().take(MAX_ERROR_PAYLOAD).collect();
    cut.push_str("...");
    cut
}
