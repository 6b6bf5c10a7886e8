//! Tool trait and the capability registry.
//!
//! Tools are the data providers the model may call: price lookups,
//! activity feeds, and so on. The registry is built once at startup and
//! shared read-only (`Arc<ToolRegistry>`) by the loop and the dispatcher.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A model-issued request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID within the assistant turn (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The normalized outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Output on success, a normalized error message otherwise
    pub payload: String,

    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            payload: payload.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            payload: payload.into(),
            is_error: true,
        }
    }
}

/// The core Tool trait.
///
/// A tool has a unique name, a JSON Schema for its arguments (which doubles
/// as the input validator), and an async `execute` returning a string.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "get_price").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with already-validated arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, keyed by unique name.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Fails if a tool with the same name already exists.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }
        tracing::debug!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name. Absence is a normal condition, not an error.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All tools, ordered by name.
    pub fn list(&self) -> impl Iterator<Item = &dyn Tool> {
        self.tools.values().map(|t| t.as_ref())
    }

    /// Tool definitions for binding to the model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.list().map(|t| t.to_definition()).collect()
    }

    /// Human-readable catalogue of tools, appended to the system prompt.
    pub fn catalogue(&self) -> String {
        if self.tools.is_empty() {
            return String::new();
        }

        let mut out = String::from("## Available tools\n");
        for tool in self.list() {
            out.push_str(&format!("- `{}`: {}\n", tool.name(), tool.description()));
        }
        out
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
            Ok(arguments["text"].as_str().unwrap_or("").to_string())
        }
    }

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "named"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _arguments: serde_json::Value) -> Result<String, ToolError> {
            Ok(String::new())
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        let err = registry.register(Box::new(EchoTool)).unwrap_err();
        assert!(matches!(err, ToolError::DuplicateName(ref n) if n == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[0].parameters["required"][0], "text");
    }

    #[test]
    fn list_is_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(NamedTool("zeta"))).unwrap();
        registry.register(Box::new(NamedTool("alpha"))).unwrap();
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn catalogue_lists_every_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        registry.register(Box::new(NamedTool("other"))).unwrap();
        let catalogue = registry.catalogue();
        assert!(catalogue.contains("`echo`: Echoes back the input"));
        assert!(catalogue.contains("`other`"));
        assert!(ToolRegistry::new().catalogue().is_empty());
    }

    #[tokio::test]
    async fn lookup_then_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool)).unwrap();
        let out = registry
            .get("echo")
            .unwrap()
            .execute(serde_json::json!({"text": "hello world"}))
            .await
            .unwrap();
        assert_eq!(out, "hello world");
    }
}
