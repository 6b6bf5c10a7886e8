//! Error types for the quarry domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`RunError`] is the only
//! family that escapes an agent run.

use thiserror::Error;

/// The top-level error type for quarry operations outside a run.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Thread store errors ---
    #[error("Thread store error: {0}")]
    ThreadStore(#[from] ThreadStoreError),

    // --- Run failures ---
    #[error("Run failed: {0}")]
    Run(#[from] RunError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether a retry of the same request can reasonably succeed.
    ///
    /// Transport failures, rate limits and server-side (5xx) errors are
    /// transient; credentials, unknown models and client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) | Self::RateLimited { .. } => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::InvalidResponse(_) => true,
            Self::AuthenticationFailed(_) | Self::ModelNotFound(_) | Self::NotConfigured(_) => {
                false
            }
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("unknown tool {0}")]
    NotFound(String),

    #[error("a tool named '{0}' is already registered")]
    DuplicateName(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{tool_name} failed: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("{tool_name} timed out after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },
}

#[derive(Debug, Clone, Error)]
pub enum ThreadStoreError {
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Run-level failures: the only errors that escape the agent loop.
///
/// Tool failures never show up here; the dispatcher turns them into
/// tool-role messages so the model can recover.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("model invocation failed after {attempts} attempt(s): {source}")]
    ModelInvocation {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("run exceeded the limit of {limit} model turns")]
    BoundedTurnsExceeded { limit: u32 },

    #[error("could not shape the answer into JSON after {attempts} attempt(s): {reason}")]
    FormatterParse { attempts: u32, reason: String },

    #[error("run was cancelled")]
    Cancelled,

    #[error("thread store failure: {0}")]
    ThreadStore(#[from] ThreadStoreError),
}

impl RunError {
    /// Stable machine-readable code, distinct per failure class.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ModelInvocation { .. } => "model_invocation_failed",
            Self::BoundedTurnsExceeded { .. } => "bounded_turns_exceeded",
            Self::FormatterParse { .. } => "formatter_parse_failed",
            Self::Cancelled => "cancelled",
            Self::ThreadStore(_) => "thread_store_failed",
        }
    }

    /// A message safe to show to an end user. Never carries upstream detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::ModelInvocation { .. } | Self::ThreadStore(_) => {
                "The assistant is temporarily unavailable. Please try again."
            }
            Self::BoundedTurnsExceeded { .. } => {
                "The assistant could not reach an answer within its step budget."
            }
            Self::FormatterParse { .. } => {
                "The assistant answered, but the answer could not be shaped into the requested format."
            }
            Self::Cancelled => "The request was cancelled.",
        }
    }
}
