//! # quarry core
//!
//! Domain types, traits, and error definitions for the quarry agent: a
//! tool-using LLM loop that answers a query with a JSON object of a
//! caller-declared shape. This crate has no framework dependencies; the
//! other crates implement against it.
//!
//! Every seam is a trait here (`Provider`, `Tool`, `ThreadStore`), so
//! tests swap in scripted stubs and backends can change without touching
//! the loop.

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod schema;
pub mod shape;
pub mod thread;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, RunError, ThreadStoreError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{ConversationState, Message, Role, ThreadId};
pub use provider::{
    ModelReply, Provider, ProviderRequest, ProviderResponse, ResponseFormat, ToolDefinition, Usage,
};
pub use shape::{AskRequest, DataType, OutputItem, OutputShape, ShapeViolation};
pub use thread::{ThreadGuard, ThreadStore};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
