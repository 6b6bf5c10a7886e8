//! Structured output formatter.
//!
//! The second pass of a run: turns the agent's free-text answer into a JSON
//! object of the requested shape. An answer that already is such an object
//! passes through untouched, so formatting is idempotent.

use std::sync::Arc;

use quarry_core::error::RunError;
use quarry_core::message::Message;
use quarry_core::provider::{Provider, ProviderRequest, ResponseFormat};
use quarry_core::shape::OutputShape;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::prompt;
use crate::retry::{RetryPolicy, invoke};

pub struct Formatter {
    provider: Arc<dyn Provider>,
    model: String,
    max_retries: u32,
    policy: RetryPolicy,
}

impl Formatter {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_retries: 2,
            policy: RetryPolicy::default(),
        }
    }

    /// Re-prompts allowed after an unparseable or mis-shaped reply.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Shape `content` into a JSON object matching `shape`.
    pub async fn format(
        &self,
        content: &str,
        shape: &OutputShape,
        cancel: &CancellationToken,
    ) -> Result<Value, RunError> {
        if let Ok(value) = parse_object(content) {
            if shape.validate(&value).is_ok() {
                debug!("Answer already matches the requested shape");
                return Ok(value);
            }
        }

        let mut messages = vec![
            Message::system(prompt::formatter_prompt(shape)),
            Message::user(content),
        ];
        let attempts = self.max_retries + 1;
        let mut last_reason = String::new();

        for attempt in 1..=attempts {
            let mut request = ProviderRequest::new(&self.model, messages.clone());
            request.temperature = 0.0;
            request.response_format = ResponseFormat::JsonObject;

            let response = invoke(self.provider.as_ref(), &request, &self.policy, cancel).await?;
            let reply = response.reply.content().to_string();

            let reason = match parse_object(&reply) {
                Ok(value) => match shape.validate(&value) {
                    Ok(()) => return Ok(value),
                    Err(violation) => violation.to_string(),
                },
                Err(reason) => reason,
            };

            warn!(attempt, reason = %reason, "Formatter reply rejected");
            messages.push(Message::assistant(reply));
            messages.push(Message::user(prompt::formatter_correction(&reason)));
            last_reason = reason;
        }

        Err(RunError::FormatterParse {
            attempts,
            reason: last_reason,
        })
    }
}

/// Parse a JSON object, tolerating a surrounding markdown code fence.
fn parse_object(text: &str) -> Result<Value, String> {
    let body = strip_fence(text.trim());
    let value: Value =
        serde_json::from_str(body).map_err(|e| format!("not valid JSON ({e})"))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err("expected a JSON object".into())
    }
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
