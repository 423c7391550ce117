//! `corvid config`: Show the effective configuration or write a starter file.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use corvid_config::AppConfig;

use super::startup;

/// Print the configuration after env overrides, with secrets masked.
pub fn show(config_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let config = startup::load_config(config_path)?;
    let rendered = render_redacted(&config)?;

    println!("# Effective configuration");
    println!();
    print!("{rendered}");
    Ok(ExitCode::SUCCESS)
}

/// Write `AppConfig::default_toml()` to the config path.
pub fn init(config_path: Option<&Path>, force: bool) -> anyhow::Result<ExitCode> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));

    if write_starter(&path, force)? {
        println!("✅ Wrote starter config to {}", path.display());
        println!("   Edit the [llm] section, then run `corvid chat`.");
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!(
            "  {} already exists. Use --force to overwrite it.",
            path.display()
        );
        Ok(ExitCode::FAILURE)
    }
}

fn render_redacted(config: &AppConfig) -> anyhow::Result<String> {
    let mut redacted = config.clone();
    if redacted.llm.api_key.is_some() {
        redacted.llm.api_key = Some("[REDACTED]".into());
    }
    toml::to_string_pretty(&redacted).context("Failed to render config")
}

/// Returns `false` without touching the file when it exists and `force` is off.
fn write_starter(path: &Path, force: bool) -> anyhow::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::write(path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}
