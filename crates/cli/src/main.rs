//! corvid CLI: the main entry point.
//!
//! Commands:
//! - `chat`: One-shot (`--prompt`) or interactive conversation
//! - `tools`: Connect to every tool server and list the tools
//! - `config`: Show the effective configuration or write a starter file
//! - `archive`: List batches stored by the file archive

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

mod commands;

#[derive(Parser)]
#[command(
    name = "corvid",
    about = "corvid: a personal assistant that works through tool servers",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./config.toml, then ~/.corvid/config.toml)
    #[arg(short, long, global = true, env = "CORVID_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant
    Chat {
        /// Send a single request instead of entering interactive mode
        #[arg(short, long)]
        prompt: Option<String>,

        /// Print only the final answer (one-shot mode)
        #[arg(long)]
        output_only: bool,

        /// Override agent.max_iterations
        #[arg(long)]
        max_iterations: Option<usize>,
    },

    /// List the tools exposed by the configured servers
    Tools,

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List archived conversation batches
    Archive {
        /// Show only the most recent N batches
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (API keys redacted)
    Show,
    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Chat {
            prompt,
            output_only,
            max_iterations,
        } => {
            let options = commands::chat::ChatOptions {
                prompt,
                output_only,
                max_iterations,
            };
            commands::chat::run(config_path, options).await
        }
        Commands::Tools => commands::tools::run(config_path).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path),
            ConfigAction::Init { force } => commands::config_cmd::init(config_path, force),
        },
        Commands::Archive { limit } => commands::archive::run(config_path, limit),
    }
}

/// Console logging goes to stderr so answers on stdout stay pipeable.
///
/// Filter: `RUST_LOG`, then `LOG_LEVEL`, then `warn` (`debug` with
/// `--verbose`). `LOG_FILE` adds a plain-text debug log in append mode.
fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let fallback = if verbose { "debug" } else { "warn" };
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            std::env::var("LOG_LEVEL")
                .map_err(|e| e.to_string())
                .and_then(|level| EnvFilter::try_new(level).map_err(|e| e.to_string()))
        })
        .unwrap_or_else(|_| EnvFilter::new(fallback));

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let file = match std::env::var("LOG_FILE") {
        Ok(path) if !path.trim().is_empty() => {
            let handle = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open LOG_FILE {path}"))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(handle))
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        _ => None,
    };

    tracing_subscriber::registry().with(console).with(file).init();
    Ok(())
}
