//! Wiring shared by the commands: config, tool servers, provider, archive.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use corvid_agent::{Orchestrator, OrchestratorSettings, ServerOptions, ToolRegistry, WindowLimits};
use corvid_config::AppConfig;
use corvid_core::error::ToolError;
use corvid_core::event::EventBus;
use corvid_core::tool::ToolServer;
use corvid_mcp::McpServer;
use tracing::{info, warn};

pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    AppConfig::load(path).context("Failed to load config")
}

/// Connect the built-in tools and every enabled MCP server.
///
/// A server that fails to start is skipped with a warning. A tool name
/// collision between servers aborts startup.
pub async fn build_registry(config: &AppConfig) -> anyhow::Result<ToolRegistry> {
    let default_timeout = Duration::from_secs(config.agent.tool_timeout_secs);
    let mut registry = ToolRegistry::new()
        .with_default_timeout(default_timeout)
        .with_max_result_length(config.agent.max_result_length);

    registry
        .register_server(
            Arc::new(corvid_tools::builtin_server()),
            ServerOptions::unprefixed(),
        )
        .await
        .context("Failed to register built-in tools")?;

    for (name, server) in config.servers.iter().filter(|(_, s)| s.enabled) {
        let timeout = server
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(default_timeout);

        let mcp = match McpServer::spawn(name, server, timeout).await {
            Ok(mcp) => Arc::new(mcp),
            Err(e) => {
                warn!(server = %name, error = %e, "Tool server unavailable, skipping");
                continue;
            }
        };

        let options = ServerOptions {
            prefix_tools: server.prefix_tools,
            timeout: Some(timeout),
        };
        match registry.register_server(mcp.clone(), options).await {
            Ok(count) => info!(server = %name, tools = count, "Tool server connected"),
            Err(e @ ToolError::DuplicateTool { .. }) => {
                mcp.shutdown().await;
                registry.shutdown_all().await;
                return Err(e).context("Tool registration failed");
            }
            Err(e) => {
                warn!(server = %name, error = %e, "Could not list tools, skipping server");
                mcp.shutdown().await;
            }
        }
    }

    Ok(registry)
}

/// Everything a chat session needs.
pub struct Session {
    pub orchestrator: Orchestrator,
    pub registry: Arc<ToolRegistry>,
    pub events: Arc<EventBus>,
}

impl Session {
    pub async fn start(config: &AppConfig, max_iterations: Option<usize>) -> anyhow::Result<Self> {
        let provider = corvid_providers::build_from_config(&config.llm)
            .context("Failed to configure the LLM provider")?;
        let registry = Arc::new(build_registry(config).await?);
        let sink = corvid_archive::build_sink(&config.archive);

        let mut settings = OrchestratorSettings::from_config(config);
        if let Some(limit) = max_iterations {
            anyhow::ensure!(limit > 0, "--max-iterations must be at least 1");
            settings.max_iterations = limit;
        }

        let events = Arc::new(EventBus::default());
        let orchestrator = Orchestrator::new(
            provider,
            registry.clone(),
            sink,
            WindowLimits::from(&config.context),
            settings,
        )
        .with_event_bus(events.clone());

        Ok(Self {
            orchestrator,
            registry,
            events,
        })
    }

    /// Archive queued batches and stop the tool servers.
    pub async fn close(mut self) {
        let report = self.orchestrator.flush_archive().await;
        if !report.lost.is_empty() {
            warn!(lost = report.lost.len(), "Some archive batches could not be stored");
        }
        self.registry.shutdown_all().await;
    }
}
