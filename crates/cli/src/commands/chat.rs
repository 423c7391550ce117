//! `corvid chat`: One-shot or interactive conversation.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use corvid_agent::{Orchestrator, describe_failure};
use corvid_config::AppConfig;
use corvid_core::error::{Error, ProviderError};
use corvid_core::event::DomainEvent;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::startup::{self, Session};

pub struct ChatOptions {
    pub prompt: Option<String>,
    pub output_only: bool,
    pub max_iterations: Option<usize>,
}

pub async fn run(config_path: Option<&Path>, options: ChatOptions) -> anyhow::Result<ExitCode> {
    let config = startup::load_config(config_path)?;

    if requires_key(&config.llm.provider) && !config.has_api_key() {
        print_key_help(&config);
        return Ok(ExitCode::FAILURE);
    }

    let session = Session::start(&config, options.max_iterations).await?;
    match options.prompt {
        Some(prompt) => Ok(one_shot(session, &prompt, options.output_only).await),
        None => interactive(session, &config).await,
    }
}

async fn one_shot(mut session: Session, prompt: &str, output_only: bool) -> ExitCode {
    let progress = (!output_only).then(|| spawn_progress(session.events.subscribe()));

    let outcome = run_cancellable(&mut session.orchestrator, prompt).await;
    if let Some(progress) = progress {
        progress.abort();
    }

    let code = match outcome {
        Ok(answer) => {
            println!("{answer}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}", describe_failure(&e));
            if let Some(hint) = failure_hint(&e) {
                eprintln!("  Hint: {hint}");
            }
            ExitCode::FAILURE
        }
    };

    session.close().await;
    code
}

async fn interactive(mut session: Session, config: &AppConfig) -> anyhow::Result<ExitCode> {
    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║          corvid — Interactive Mode           ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Provider:  {}", config.llm.provider);
    println!("  Model:     {}", config.llm.model);
    println!("  Tools:     {}", session.registry.len());
    println!("  Context:   {} tokens", config.context.max_context_tokens);
    println!();
    println!("  Type your message and press Enter.");
    println!("  Commands: 'clear' resets, 'tokens' shows usage, 'exit' quits.");
    println!("  Ctrl+C cancels a running request.");
    println!();

    let progress = spawn_progress(session.events.subscribe());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let input = line.trim();

        match input {
            "" => continue,
            "exit" | "quit" | "q" => break,
            "clear" | "reset" => {
                session.orchestrator.clear();
                println!("  Conversation cleared.");
                println!();
                continue;
            }
            "tokens" | "usage" => {
                print_usage(&session.orchestrator);
                continue;
            }
            _ => {}
        }

        match run_cancellable(&mut session.orchestrator, input).await {
            Ok(answer) => {
                println!();
                for line in answer.lines() {
                    println!("  Assistant > {line}");
                }
                println!();
            }
            Err(e) => {
                println!();
                println!("  Assistant > {}", describe_failure(&e));
                if let Some(hint) = failure_hint(&e) {
                    eprintln!("  Hint: {hint}");
                }
                println!();
            }
        }
    }

    progress.abort();
    session.close().await;

    println!();
    println!("  Goodbye!");
    println!();
    Ok(ExitCode::SUCCESS)
}

/// Run one request; Ctrl+C while it runs cancels it.
async fn run_cancellable(orchestrator: &mut Orchestrator, text: &str) -> Result<String, Error> {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let outcome = orchestrator.handle_request(text, &cancel).await;
    watcher.abort();
    outcome
}

/// Print tool activity to stderr while requests run.
fn spawn_progress(mut events: broadcast::Receiver<std::sync::Arc<DomainEvent>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let DomainEvent::ToolDispatched {
                        tool_name,
                        success,
                        duration_ms,
                        ..
                    } = event.as_ref()
                    {
                        let status = if *success { "ok" } else { "failed" };
                        eprintln!("  [tool] {tool_name} ({status}, {duration_ms} ms)");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn print_usage(orchestrator: &Orchestrator) {
    let usage = orchestrator.usage();
    let window = orchestrator.window();
    println!();
    println!("  Model calls:        {}", usage.model_calls);
    println!("  Prompt tokens:      {}", usage.prompt_tokens);
    println!("  Completion tokens:  {}", usage.completion_tokens);
    println!(
        "  Context estimate:   ~{} / {} tokens ({} turns)",
        window.total_tokens(),
        window.limits().max_context_tokens,
        window.len()
    );
    println!("  Pending archive:    {} batches", window.pending().len());
    println!();
}

fn requires_key(provider: &str) -> bool {
    matches!(provider, "anthropic" | "openai" | "openrouter")
}

fn print_key_help(config: &AppConfig) {
    eprintln!();
    eprintln!("  ERROR: No API key configured for '{}'!", config.llm.provider);
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    CORVID_API_KEY       (any provider)");
    eprintln!("    ANTHROPIC_API_KEY    (provider = \"anthropic\")");
    eprintln!("    OPENAI_API_KEY       (provider = \"openai\")");
    eprintln!("    OPENROUTER_API_KEY   (provider = \"openrouter\")");
    eprintln!();
    eprintln!("  Or add llm.api_key to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
}

/// An actionable suggestion for provider failures the user can fix.
fn failure_hint(error: &Error) -> Option<&'static str> {
    let Error::Provider(provider_error) = error else {
        return None;
    };

    match provider_error {
        ProviderError::AuthenticationFailed(_) => {
            Some("Check llm.api_key or the CORVID_API_KEY environment variable.")
        }
        ProviderError::RateLimited { .. } => {
            Some("The provider is rate limiting requests (429). Wait a moment and try again.")
        }
        ProviderError::ModelNotFound(_) => {
            Some("Check llm.model against the models your provider offers.")
        }
        ProviderError::NotConfigured(_) => {
            Some("Run `corvid config init` and fill in the [llm] section.")
        }
        ProviderError::Timeout(_) | ProviderError::Network(_) => {
            Some("Check your network connection and llm.base_url.")
        }
        ProviderError::ApiError {
            status_code,
            message,
        } => {
            let lower = message.to_lowercase();
            if *status_code == 402 || lower.contains("credit") || lower.contains("billing") {
                Some("Your provider account is out of credit. Check its billing settings.")
            } else if *status_code == 529 || lower.contains("overloaded") {
                Some("The provider is overloaded right now. Try again in a few moments.")
            } else if *status_code >= 500 {
                Some("The provider had an internal server error. Try again later.")
            } else {
                None
            }
        }
        _ => None,
    }
}
