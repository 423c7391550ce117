//! Built-in tool implementations for corvid.
//!
//! These tools run in-process and are exposed to the registry through
//! [`BuiltinServer`], so the orchestrator reaches them exactly like it
//! reaches an external tool server.

pub mod date_range;
pub mod file_write;

use async_trait::async_trait;
use corvid_core::error::ToolError;
use corvid_core::provider::ToolDefinition;
use corvid_core::tool::{Tool, ToolServer};
use std::collections::HashMap;
use tracing::debug;

pub use date_range::DateRangeTool;
pub use file_write::FileWriteTool;

/// An in-process [`ToolServer`] over a set of [`Tool`]s.
pub struct BuiltinServer {
    name: String,
    tools: HashMap<String, Box<dyn Tool>>,
}

impl BuiltinServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

#[async_trait]
impl ToolServer for BuiltinServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        Ok(self.tools.values().map(|t| t.to_definition()).collect())
    }

    async fn invoke(&self, tool: &str, arguments: serde_json::Value) -> Result<String, ToolError> {
        let handler = self
            .tools
            .get(tool)
            .ok_or_else(|| ToolError::UnknownTool(tool.to_string()))?;
        debug!(server = %self.name, tool, "Invoking built-in tool");
        handler.execute(arguments).await
    }
}

/// Create the built-in server with every bundled tool.
pub fn builtin_server() -> BuiltinServer {
    let mut server = BuiltinServer::new("builtin");
    server.register(Box::new(DateRangeTool));
    server.register(Box::new(FileWriteTool::new()));
    server
}
