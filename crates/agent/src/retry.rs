//! Model invocation with timeout, retry and cancellation.

use std::time::Duration;

use quarry_config::AgentConfig;
use quarry_core::error::{ProviderError, RunError};
use quarry_core::provider::{Provider, ProviderRequest, ProviderResponse};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How a single model invocation is bounded and retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,
    /// Delay before the first retry; doubles on each further retry
    pub backoff: Duration,
    /// Per-attempt timeout
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            retries: config.model_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
            timeout: Duration::from_secs(config.model_timeout_secs),
        }
    }

    /// Delay before retry number `retry` (1-based).
    fn delay(&self, retry: u32, error: &ProviderError) -> Duration {
        let exp = self
            .backoff
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)));
        match error {
            ProviderError::RateLimited { retry_after_secs } => {
                exp.max(Duration::from_secs(*retry_after_secs))
            }
            _ => exp,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

/// Invoke the provider until it answers, the error is not retryable, the
/// retry budget is spent, or `cancel` fires.
pub(crate) async fn invoke(
    provider: &dyn Provider,
    request: &ProviderRequest,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<ProviderResponse, RunError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
            r = tokio::time::timeout(policy.timeout, provider.complete(request.clone())) => r,
        };

        let error = match outcome {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(e)) => e,
            Err(_) => ProviderError::Timeout(format!(
                "no response within {}s",
                policy.timeout.as_secs()
            )),
        };

        if !error.is_retryable() || attempt > policy.retries {
            return Err(RunError::ModelInvocation {
                attempts: attempt,
                source: error,
            });
        }

        let delay = policy.delay(attempt, &error);
        warn!(
            provider = provider.name(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Model invocation failed, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
