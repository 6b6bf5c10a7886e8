//! Message and conversation-state domain types.
//!
//! These are the values that flow through a run:
//! caller query → system/user messages → assistant turns → tool results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::tool::ToolCall;

/// Opaque, caller-supplied identifier of a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    /// Generate a fresh random thread id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions and the tool catalogue
    System,
    /// The caller's query
    User,
    /// A model turn
    Assistant,
    /// Tool execution result
    Tool,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant, in issue order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content.into());
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }
}

/// The full history of one thread plus its turn counter.
///
/// Mutated only by appending; prior messages are never edited in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub thread_id: ThreadId,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// Model invocations recorded on this thread across all runs
    pub turn_count: u32,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    /// Create a new empty state for a thread.
    pub fn new(thread_id: ThreadId) -> Self {
        let now = Utc::now();
        Self {
            thread_id,
            messages: Vec::new(),
            turn_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check the tool-call pairing invariant over the whole history.
    ///
    /// Every tool-role message must answer a call of the nearest preceding
    /// assistant message, and every call must be answered exactly once
    /// before the next non-tool message.
    pub fn tool_calls_balanced(&self) -> bool {
        let mut open: Option<HashSet<&str>> = None;

        for msg in &self.messages {
            match msg.role {
                Role::Tool => {
                    let Some(pending) = open.as_mut() else {
                        return false;
                    };
                    let Some(id) = msg.tool_call_id.as_deref() else {
                        return false;
                    };
                    if !pending.remove(id) {
                        return false;
                    }
                }
                _ => {
                    if open.as_ref().is_some_and(|pending| !pending.is_empty()) {
                        return false;
                    }
                    open = if msg.role == Role::Assistant && !msg.tool_calls.is_empty() {
                        Some(msg.tool_calls.iter().map(|c| c.id.as_str()).collect())
                    } else {
                        None
                    };
                }
            }
        }

        open.is_none_or(|pending| pending.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "get_price".into(),
            arguments: serde_json::json!({"symbol": "TOKENX"}),
        }
    }

    #[test]
    fn create_user_message() {
        let msg = Message::user("price of TOKENX");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "price of TOKENX");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn state_tracks_updates() {
        let mut state = ConversationState::new(ThreadId::from("t1"));
        let created = state.created_at;

        state.push(Message::user("First message"));
        assert_eq!(state.len(), 1);
        assert!(state.updated_at >= created);
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::assistant_with_tools("", vec![call("c1")]);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::Assistant);
        assert_eq!(back.tool_calls.len(), 1);
        assert_eq!(back.tool_calls[0].arguments["symbol"], "TOKENX");
    }

    #[test]
    fn balanced_history_passes() {
        let mut state = ConversationState::new(ThreadId::from("t"));
        state.push(Message::system("sys"));
        state.push(Message::user("q"));
        state.push(Message::assistant_with_tools("", vec![call("a"), call("b")]));
        state.push(Message::tool_result("a", "1"));
        state.push(Message::tool_result("b", "2"));
        state.push(Message::assistant("done"));
        assert!(state.tool_calls_balanced());
    }

    #[test]
    fn unanswered_call_is_detected() {
        let mut state = ConversationState::new(ThreadId::from("t"));
        state.push(Message::assistant_with_tools("", vec![call("a"), call("b")]));
        state.push(Message::tool_result("a", "1"));
        assert!(!state.tool_calls_balanced());

        state.push(Message::assistant("done"));
        assert!(!state.tool_calls_balanced());
    }

    #[test]
    fn stray_tool_result_is_detected() {
        let mut state = ConversationState::new(ThreadId::from("t"));
        state.push(Message::user("q"));
        state.push(Message::tool_result("x", "orphan"));
        assert!(!state.tool_calls_balanced());
    }

    #[test]
    fn thread_id_display() {
        assert_eq!(ThreadId::from("abc").to_string(), "abc");
        assert_eq!(ThreadId::from(String::from("abc")), ThreadId::from("abc"));
        let converted: ThreadId = "xyz".into();
        assert_eq!(converted.as_str(), "xyz");
        assert_ne!(ThreadId::new(), ThreadId::new());
    }
}
