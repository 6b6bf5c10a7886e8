//! The agent loop of quarry.
//!
//! A run answers one request on one thread:
//!
//! 1. **Seed or load** the thread (system prompt + tool catalogue on first use)
//! 2. **Append** the user query with the requested output fields
//! 3. **Invoke the model** with the full history and bound tools
//! 4. **If tool calls**: dispatch them concurrently, append results, go to 3
//! 5. **If an answer**: shape it into JSON with the formatter and store the thread
//!
//! The loop stops with an error when the turn budget runs out, the model
//! keeps failing, the formatter cannot produce the shape, or the run is
//! cancelled. Tool failures never stop it.

pub mod dispatcher;
pub mod formatter;
pub mod loop_runner;
pub mod prompt;
pub mod retry;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use dispatcher::Dispatcher;
pub use formatter::Formatter;
pub use loop_runner::{AgentLoop, RunOutcome};
pub use retry::RetryPolicy;
pub use tokio_util::sync::CancellationToken;
