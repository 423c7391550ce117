//! A tool server reached over MCP.

use async_trait::async_trait;
use corvid_config::ServerConfig;
use corvid_core::error::ToolError;
use corvid_core::provider::ToolDefinition;
use corvid_core::tool::ToolServer;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::connection::McpConnection;
use crate::protocol::{CallToolResult, InitializeResult, ToolsListResult, initialize_params};

/// Upper bound on `tools/list` pages, in case a server keeps returning cursors.
const MAX_LIST_PAGES: usize = 64;

pub struct McpServer {
    name: String,
    connection: McpConnection,
    child: Mutex<Option<Child>>,
    server_info: Option<String>,
}

impl McpServer {
    /// Launch the configured command and complete the MCP handshake.
    pub async fn spawn(
        name: &str,
        config: &ServerConfig,
        request_timeout: Duration,
    ) -> Result<Self, ToolError> {
        info!(server = name, command = %config.command, "Starting tool server");

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ToolError::Transport(format!("{name}: failed to start '{}': {e}", config.command))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Transport(format!("{name}: stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Transport(format!("{name}: stdout not captured")))?;

        if let Some(stderr) = child.stderr.take() {
            let label = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %label, "{line}");
                }
            });
        }

        let connection = McpConnection::from_streams(name, stdout, stdin, request_timeout);
        let mut server = Self::connect(name, connection).await?;
        server.child = Mutex::new(Some(child));
        Ok(server)
    }

    /// Complete the handshake over an existing connection.
    pub async fn connect(name: &str, connection: McpConnection) -> Result<Self, ToolError> {
        let init: InitializeResult = connection
            .request(
                "initialize",
                Some(initialize_params(env!("CARGO_PKG_VERSION"))),
            )
            .await?;
        connection.notify("notifications/initialized", None).await?;

        let server_info = init
            .server_info
            .map(|info| format!("{} {}", info.name, info.version).trim().to_string());
        info!(
            server = name,
            protocol = %init.protocol_version,
            info = server_info.as_deref().unwrap_or("unknown"),
            "Tool server initialized"
        );

        Ok(Self {
            name: name.to_string(),
            connection,
            child: Mutex::new(None),
            server_info,
        })
    }

    /// Name and version the server reported during the handshake.
    pub fn server_info(&self) -> Option<&str> {
        self.server_info.as_deref()
    }
}

#[async_trait]
impl ToolServer for McpServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        let mut definitions = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let page: ToolsListResult = self.connection.request("tools/list", params).await?;

            definitions.extend(page.tools.into_iter().map(|tool| ToolDefinition {
                description: tool.description.unwrap_or_default(),
                parameters: tool
                    .input_schema
                    .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
                name: tool.name,
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(server = %self.name, count = definitions.len(), "Listed tools");
        Ok(definitions)
    }

    async fn invoke(&self, tool: &str, arguments: Value) -> Result<String, ToolError> {
        let result: CallToolResult = self
            .connection
            .request(
                "tools/call",
                Some(serde_json::json!({ "name": tool, "arguments": arguments })),
            )
            .await?;

        let text = result.text();
        if result.is_error {
            return Err(ToolError::InvocationFailed {
                tool_name: tool.to_string(),
                reason: if text.is_empty() {
                    "tool reported an error".into()
                } else {
                    text
                },
            });
        }
        Ok(text)
    }

    async fn shutdown(&self) {
        self.connection.close();
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
            debug!(server = %self.name, "Tool server stopped");
        }
    }
}
