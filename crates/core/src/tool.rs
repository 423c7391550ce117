//! Tool abstractions: in-process tools, tool servers, and call records.
//!
//! A [`ToolServer`] is anything that can describe a set of tools and invoke
//! them by name: an MCP process over stdio, or the in-process set of built-in
//! [`Tool`]s. The agent's registry flattens every server into one namespace.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A request from the LLM to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlation ID (matches the LLM's tool_call id)
    pub id: String,

    /// Exposed name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// Outcome of one tool call: a payload, or a structured failure the LLM can
/// read and react to.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Success(String),
    Failure(ToolError),
}

/// The result of dispatching one [`ToolCallRequest`].
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    /// The call ID this result is for
    pub call_id: String,

    /// The tool that was (or would have been) called
    pub tool_name: String,

    pub outcome: ToolOutcome,
}

impl ToolCallResult {
    pub fn success(request: &ToolCallRequest, payload: impl Into<String>) -> Self {
        Self {
            call_id: request.id.clone(),
            tool_name: request.name.clone(),
            outcome: ToolOutcome::Success(payload.into()),
        }
    }

    pub fn failure(request: &ToolCallRequest, error: ToolError) -> Self {
        Self {
            call_id: request.id.clone(),
            tool_name: request.name.clone(),
            outcome: ToolOutcome::Failure(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success(_))
    }
}

/// An in-process tool.
///
/// Built-in tools implement this trait and are exposed to the registry
/// through an adapter implementing [`ToolServer`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "write_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments, returning the text payload.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A source of tools reached through a uniform invocation interface.
///
/// `list_tools` is called once at startup; names are server-local. `invoke`
/// receives the server-local name, never the exposed (possibly prefixed) one.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Server name, used for prefixing and in diagnostics.
    fn name(&self) -> &str;

    /// Discover the tools this server offers.
    async fn list_tools(&self) -> std::result::Result<Vec<ToolDefinition>, ToolError>;

    /// Invoke one tool and return its text payload.
    async fn invoke(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<String, ToolError>;

    /// Release any resources held by the server (child process, sockets).
    async fn shutdown(&self) {}
}
