//! The tool capability surface (spec §6).
//!
//! The teacher's `tool_protocol` module routes calls across multiple
//! pluggable *protocols* (MCP servers, custom function calling, etc.) with
//! a `ToolRegistry` that maps tool name -> protocol. Concrete protocol
//! routing is out of scope here, but the registry shape survives: a
//! name-keyed map of callable capabilities behind an `async_trait`, with
//! the same `NotFound`/`ExecutionFailed` error split the teacher's
//! `ToolError` makes.

use crate::agentcore::message::ToolDefinition;
use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug)]
pub enum ToolError {
    NotFound(String),
    ExecutionFailed(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "tool not found: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "tool execution failed: {}", msg),
        }
    }
}

impl StdError for ToolError {}

/// A single callable capability the model may invoke.
///
/// `execute` returns a JSON value rather than a structured `ToolResult`
/// envelope: the dispatcher (spec §5) is what decides how a tool's error
/// is turned into a `{"error": ...}` payload on the transcript, so the
/// trait itself stays minimal.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, Box<dyn StdError + Send + Sync>>;
}

/// Name-keyed, runtime-mutable collection of [`Tool`]s.
///
/// Wrapped in `Arc<RwLock<_>>` by [`crate::agentcore::agent::Agent`] so
/// tools can be registered or removed between runs without rebuilding the
/// agent, mirroring the teacher's registry being a freestanding value the
/// caller owns and mutates directly.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.definition().name, tool);
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Snapshot of every registered tool's definition, in the order the
    /// registry's internal map yields them. Sent verbatim as `Request::tools`.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }
}

/// Async-safe handle shared between the agent loop and any caller wanting
/// to mutate tools while a run is in flight.
pub type SharedToolRegistry = Arc<RwLock<ToolRegistry>>;

pub fn shared_registry() -> SharedToolRegistry {
    Arc::new(RwLock::new(ToolRegistry::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                description: "echoes its input".to_string(),
                parameters_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(
            &self,
            arguments: serde_json::Value,
        ) -> Result<serde_json::Value, Box<dyn StdError + Send + Sync>> {
            Ok(arguments)
        }
    }

    #[test]
    fn register_and_fetch_roundtrips() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.definitions().len(), 1);
    }

    #[test]
    fn unregister_removes_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.unregister("echo").is_some());
        assert!(registry.get("echo").is_none());
        assert!(registry.unregister("echo").is_none());
    }

    #[tokio::test]
    async fn echo_tool_executes() {
        let tool = EchoTool;
        let result = tool.execute(serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(result, serde_json::json!({"x": 1}));
    }
}
