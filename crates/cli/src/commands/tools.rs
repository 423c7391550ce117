//! `corvid tools`: List every tool the assistant can call.

use std::path::Path;
use std::process::ExitCode;

use super::startup;

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let config = startup::load_config(config_path)?;
    let registry = startup::build_registry(&config).await?;

    println!("🔧 Tools ({})", registry.len());
    println!("─────────────────────────────────────");
    for definition in registry.definitions() {
        let server = registry.server_of(&definition.name).unwrap_or("?");
        let summary = definition.description.lines().next().unwrap_or_default();
        println!("  {:<32} [{server}] {summary}", definition.name);
    }

    let configured = config.servers.len();
    let enabled = config.servers.values().filter(|s| s.enabled).count();
    println!();
    println!("  Servers: {enabled} enabled of {configured} configured (plus built-in)");

    registry.shutdown_all().await;
    Ok(ExitCode::SUCCESS)
}
