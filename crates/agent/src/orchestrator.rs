//! The orchestration loop.
//!
//! One [`Orchestrator`] drives one conversation through the cycle:
//!
//! 1. **Start**: append the user turn, archive batches pruned earlier
//! 2. **Think**: send the conversation and tool schemas to the LLM
//! 3. **Decide**: a plain answer ends the request; tool calls go to Act
//! 4. **Act**: dispatch the calls concurrently, append results in request
//!    order, enforce the budget, back to Think
//!
//! The loop stops at a final answer, at the iteration ceiling, on a provider
//! error, or when the caller cancels.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use corvid_config::AppConfig;
use corvid_core::archive::ArchiveSink;
use corvid_core::error::{Error, ProviderError};
use corvid_core::event::{DomainEvent, EventBus};
use corvid_core::message::Turn;
use corvid_core::provider::{Provider, ProviderRequest};
use corvid_core::tool::{ToolCallRequest, ToolCallResult};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::{ContextWindowManager, DrainReport, PruneReport, WindowLimits};
use crate::registry::ToolRegistry;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are corvid, a personal assistant with access to \
tools. Use a tool when it helps answer the request, and answer directly otherwise.";

/// Replaces an empty final answer.
pub const EMPTY_ANSWER_NOTICE: &str = "(The model returned an empty response.)";

const PREVIEW_CHARS: usize = 80;

/// Per-conversation generation settings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub model: String,
    pub system_prompt: Option<String>,
    /// Prefix the system prompt with the current local date and time.
    pub include_current_time: bool,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Model calls allowed per request.
    pub max_iterations: usize,
    /// After a context-overflow rejection, prune to the retention target and
    /// try once more instead of failing.
    pub retry_on_context_overflow: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".into(),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.into()),
            include_current_time: true,
            temperature: 0.7,
            max_tokens: Some(4096),
            max_iterations: 50,
            retry_on_context_overflow: false,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.llm.model.clone(),
            system_prompt: Some(
                config
                    .llm
                    .system_prompt
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            ),
            include_current_time: true,
            temperature: config.llm.temperature,
            max_tokens: Some(config.llm.max_tokens),
            max_iterations: config.agent.max_iterations,
            retry_on_context_overflow: config.agent.retry_on_context_overflow,
        }
    }
}

/// Token usage reported by the provider across requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTotals {
    pub model_calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl UsageTotals {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Drives one conversation between the LLM and the tool servers.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    sink: Arc<dyn ArchiveSink>,
    window: ContextWindowManager,
    settings: OrchestratorSettings,
    events: Option<Arc<EventBus>>,
    usage: UsageTotals,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        sink: Arc<dyn ArchiveSink>,
        limits: WindowLimits,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            provider,
            registry,
            sink,
            window: ContextWindowManager::new(limits),
            settings,
            events: None,
            usage: UsageTotals::default(),
        }
    }

    /// Publish progress events to `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Run one user request to completion.
    ///
    /// Returns the final answer, or the reportable error that ended the
    /// request. Cancellation is honoured before every model call; tool calls
    /// already running finish, but their results are discarded.
    pub async fn handle_request(
        &mut self,
        user_text: &str,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        self.publish(DomainEvent::RequestStarted {
            content_preview: user_text.chars().take(PREVIEW_CHARS).collect(),
            timestamp: Utc::now(),
        });

        let mut iterations = 0;
        let outcome = self.run(user_text, cancel, &mut iterations).await;

        self.publish(DomainEvent::RequestFinished {
            iterations,
            success: outcome.is_ok(),
            timestamp: Utc::now(),
        });
        match &outcome {
            Ok(_) => info!(iterations, "Request complete"),
            Err(Error::Cancelled) => info!(iterations, "Request cancelled"),
            Err(e) => warn!(iterations, error = %e, "Request failed"),
        }
        outcome
    }

    async fn run(
        &mut self,
        user_text: &str,
        cancel: &CancellationToken,
        iterations: &mut usize,
    ) -> Result<String, Error> {
        // Start
        self.window.append(Turn::user(user_text));
        // Not raced against cancellation.
        let sink = self.sink.clone();
        let report = self.window.drain_pending(sink.as_ref()).await;
        self.record_drain(report);
        // Batches queued here wait for the next request's drain.
        if let Some(report) = self.window.enforce_budget() {
            self.record_prune(report);
        }

        let mut overflow_retried = false;
        loop {
            // Think
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if *iterations >= self.settings.max_iterations {
                error!(limit = self.settings.max_iterations, "Iteration limit reached without a final answer");
                return Err(Error::IterationLimitExceeded {
                    limit: self.settings.max_iterations,
                });
            }
            *iterations += 1;
            debug!(iteration = *iterations, turns = self.window.len(), tokens = self.window.total_tokens(), "Calling model");

            let request = self.build_request();
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                response = self.provider.complete(request) => response,
            };

            let response = match response {
                Ok(response) => response,
                Err(ProviderError::ContextOverflow(message)) => {
                    if self.settings.retry_on_context_overflow && !overflow_retried {
                        overflow_retried = true;
                        warn!("Backend reported context overflow; pruning to retention target and retrying once");
                        if let Some(report) = self.window.prune_to_retention() {
                            self.record_prune(report);
                            continue;
                        }
                    }
                    return Err(Error::ContextOverflow(message));
                }
                Err(e) => return Err(Error::Provider(e)),
            };

            if let Some(usage) = response.usage {
                self.usage.prompt_tokens += u64::from(usage.prompt_tokens);
                self.usage.completion_tokens += u64::from(usage.completion_tokens);
            }
            self.usage.model_calls += 1;

            // Decide
            let mut turn = response.turn;
            if !turn.has_tool_calls() {
                if turn.content.trim().is_empty() {
                    warn!(stop_reason = ?response.stop_reason, "Model returned an empty answer");
                    turn.content = EMPTY_ANSWER_NOTICE.into();
                }
                let answer = turn.content.clone();
                self.window.append(turn);
                if let Some(report) = self.window.enforce_budget() {
                    self.record_prune(report);
                }
                return Ok(answer);
            }

            // Act
            info!(
                iteration = *iterations,
                calls = turn.tool_calls.len(),
                tools = ?turn.tool_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "Dispatching tool calls"
            );
            let results = self.dispatch_all(&turn.tool_calls).await;

            if cancel.is_cancelled() {
                warn!(calls = results.len(), "Request cancelled during tool calls; discarding results");
                return Err(Error::Cancelled);
            }

            self.window.append(turn);
            for result in &results {
                self.window.append(Turn::tool_result(result));
            }
            if let Some(report) = self.window.enforce_budget() {
                self.record_prune(report);
            }
        }
    }

    fn build_request(&self) -> ProviderRequest {
        let system = self.settings.system_prompt.as_ref().map(|prompt| {
            if self.settings.include_current_time {
                let now = chrono::Local::now();
                format!(
                    "Current date and time: {}\n\n{prompt}",
                    now.format("%A, %B %d, %Y at %I:%M %p")
                )
            } else {
                prompt.clone()
            }
        });

        ProviderRequest {
            model: self.settings.model.clone(),
            system,
            turns: self.window.sendable_turns(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            tools: self.registry.definitions(),
        }
    }

    /// Dispatch every call concurrently; results come back in call order.
    async fn dispatch_all(&self, calls: &[ToolCallRequest]) -> Vec<ToolCallResult> {
        join_all(calls.iter().map(|call| self.dispatch_one(call))).await
    }

    async fn dispatch_one(&self, call: &ToolCallRequest) -> ToolCallResult {
        let start = Instant::now();
        let result = self.registry.dispatch(call).await;
        self.publish(DomainEvent::ToolDispatched {
            tool_name: call.name.clone(),
            success: result.is_success(),
            duration_ms: start.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
        result
    }

    fn record_prune(&self, report: PruneReport) {
        self.publish(DomainEvent::ContextPruned {
            batch_id: report.batch_id,
            turns_removed: report.turns_removed,
            tokens_before: report.tokens_before,
            tokens_after: report.tokens_after,
            timestamp: Utc::now(),
        });
    }

    fn record_drain(&self, report: DrainReport) {
        for batch in report.ingested {
            self.publish(DomainEvent::ArchiveIngested {
                batch_id: batch.batch_id,
                turns: batch.turns,
                timestamp: Utc::now(),
            });
        }
        for batch in report.lost {
            self.publish(DomainEvent::ArchiveBatchLost {
                batch_id: batch.batch_id,
                turns: batch.turns,
                reason: batch.reason,
                timestamp: Utc::now(),
            });
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Archive whatever pruning has queued, without waiting for the next
    /// request. Used when the session ends.
    pub async fn flush_archive(&mut self) -> DrainReport {
        let sink = self.sink.clone();
        let report = self.window.drain_pending(sink.as_ref()).await;
        self.record_drain(report.clone());
        report
    }

    /// Start a fresh conversation. Batches already pruned stay queued.
    pub fn clear(&mut self) {
        self.window.clear();
        self.usage = UsageTotals::default();
    }

    pub fn usage(&self) -> UsageTotals {
        self.usage
    }

    /// Estimated size of the active conversation.
    pub fn context_tokens(&self) -> usize {
        self.window.total_tokens()
    }

    pub fn window(&self) -> &ContextWindowManager {
        &self.window
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }
}

/// A user-facing explanation of why a request ended without an answer.
pub fn describe_failure(error: &Error) -> String {
    match error {
        Error::IterationLimitExceeded { limit } => format!(
            "I stopped after {limit} model calls without reaching a final answer. \
             Try narrowing the request or raising agent.max_iterations."
        ),
        Error::ContextOverflow(_) => "The conversation is too large for the model's context \
             window even after pruning older turns. Clear the conversation or shorten the request."
            .to_string(),
        Error::Cancelled => "The request was cancelled.".to_string(),
        Error::Provider(e) => format!("The language model request failed: {e}"),
    }
}
