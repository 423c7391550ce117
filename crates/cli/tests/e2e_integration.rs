//! End-to-end integration tests for the corvid assistant.
//!
//! These tests drive the full request pipeline (orchestrator, registry,
//! context window, archive) with a scripted provider and in-process tool
//! servers. No network and no child processes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use corvid_agent::{
    ContextWindowManager, Orchestrator, OrchestratorSettings, ServerOptions, ToolRegistry,
    WindowLimits, describe_failure,
};
use corvid_archive::{InMemorySink, JsonlFileSink};
use corvid_core::archive::{ArchiveBatch, ArchiveSink};
use corvid_core::error::{ArchiveError, Error, ProviderError, ToolError};
use corvid_core::event::{DomainEvent, EventBus};
use corvid_core::message::{Role, Turn};
use corvid_core::provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
use corvid_core::tool::{ToolCallRequest, ToolServer};
use serde_json::json;
use tokio_util::sync::CancellationToken;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A provider that replies from a script and records every request.
///
/// When the script runs out it keeps returning `fallback`.
struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<Turn, ProviderError>>>,
    fallback: Option<Turn>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<Result<Turn, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn turns(turns: Vec<Turn>) -> Arc<Self> {
        Self::new(turns.into_iter().map(Ok).collect())
    }

    fn repeating(turn: Turn) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(turn),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let next = self.replies.lock().unwrap().pop_front();
        let turn = match next {
            Some(reply) => reply?,
            None => self
                .fallback
                .clone()
                .unwrap_or_else(|| panic!("ScriptedProvider exhausted after {} calls", self.calls())),
        };
        Ok(ProviderResponse {
            turn,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock".into(),
            stop_reason: None,
        })
    }
}

fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.into(),
        name: name.into(),
        arguments,
    }
}

fn calls_turn(calls: Vec<ToolCallRequest>) -> Turn {
    Turn::assistant_with_calls("", calls)
}

// ── Mock tool server ─────────────────────────────────────────────────────

/// An in-process tool server with a single `lookup` tool.
///
/// `lookup` answers `"<server>:<query>"` after sleeping `delay_ms`, or fails
/// when `fail` is set.
struct CalendarServer {
    name: String,
    invocations: AtomicUsize,
}

impl CalendarServer {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            invocations: AtomicUsize::new(0),
        })
    }

    fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolServer for CalendarServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        Ok(vec![ToolDefinition {
            name: "lookup".into(),
            description: "Look up calendar entries".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "delay_ms": {"type": "integer", "minimum": 0},
                    "fail": {"type": "boolean"}
                },
                "required": ["query"]
            }),
        }])
    }

    async fn invoke(&self, tool: &str, arguments: serde_json::Value) -> Result<String, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(ms) = arguments["delay_ms"].as_u64() {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if arguments["fail"].as_bool() == Some(true) {
            return Err(ToolError::InvocationFailed {
                tool_name: tool.into(),
                reason: "calendar backend unavailable".into(),
            });
        }
        Ok(format!("{}:{}", self.name, arguments["query"].as_str().unwrap_or_default()))
    }
}

/// Records every batch it is offered; rejects the first `reject_first`.
struct FlakySink {
    reject_first: usize,
    offered: Mutex<Vec<String>>,
    stored: Mutex<Vec<String>>,
}

impl FlakySink {
    fn new(reject_first: usize) -> Arc<Self> {
        Arc::new(Self {
            reject_first,
            offered: Mutex::new(Vec::new()),
            stored: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ArchiveSink for FlakySink {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn ingest(&self, batch: &ArchiveBatch) -> Result<(), ArchiveError> {
        let attempt = {
            let mut offered = self.offered.lock().unwrap();
            offered.push(batch.id.clone());
            offered.len()
        };
        if attempt <= self.reject_first {
            return Err(ArchiveError::Storage("disk full".into()));
        }
        self.stored.lock().unwrap().push(batch.id.clone());
        Ok(())
    }
}

/// Records each batch, then takes half a second to acknowledge it.
struct SlowAckSink {
    stored: Mutex<Vec<String>>,
}

#[async_trait]
impl ArchiveSink for SlowAckSink {
    fn name(&self) -> &str {
        "slow-ack"
    }

    async fn ingest(&self, batch: &ArchiveBatch) -> Result<(), ArchiveError> {
        self.stored.lock().unwrap().push(batch.id.clone());
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(())
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

fn settings(max_iterations: usize) -> OrchestratorSettings {
    OrchestratorSettings {
        model: "mock".into(),
        system_prompt: Some("You are a test assistant.".into()),
        include_current_time: false,
        max_iterations,
        ..OrchestratorSettings::default()
    }
}

async fn calendar_registry(server: Arc<CalendarServer>, options: ServerOptions) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register_server(server, options).await.unwrap();
    Arc::new(registry)
}

fn orchestrator(
    provider: Arc<ScriptedProvider>,
    registry: Arc<ToolRegistry>,
    sink: Arc<dyn ArchiveSink>,
) -> Orchestrator {
    Orchestrator::new(provider, registry, sink, WindowLimits::default(), settings(10))
}

fn tool_turns(request: &ProviderRequest) -> Vec<Turn> {
    request
        .turns
        .iter()
        .filter(|t| t.role == Role::Tool)
        .cloned()
        .collect()
}

// ── E2E: built-in tools ──────────────────────────────────────────────────

#[tokio::test]
async fn e2e_date_range_through_builtin_server() {
    let provider = ScriptedProvider::turns(vec![
        calls_turn(vec![call(
            "call_1",
            "calculate_date_range",
            json!({"period": "last week", "reference_date": "2025-03-12"}),
        )]),
        Turn::assistant("Last week ran from March 2 to March 8."),
    ]);

    let mut registry = ToolRegistry::new();
    registry
        .register_server(Arc::new(corvid_tools::builtin_server()), ServerOptions::unprefixed())
        .await
        .unwrap();
    let registry = Arc::new(registry);
    assert!(registry.names().contains(&"calculate_date_range"));
    assert!(registry.names().contains(&"write_file"));

    let mut orch = orchestrator(provider.clone(), registry, Arc::new(InMemorySink::new()));
    let answer = orch
        .handle_request("What dates was last week?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(answer, "Last week ran from March 2 to March 8.");
    assert_eq!(provider.calls(), 2);

    let first = provider.request(0);
    assert!(first.tools.iter().any(|t| t.name == "calculate_date_range"));
    assert_eq!(first.system.as_deref(), Some("You are a test assistant."));

    let results = tool_turns(&provider.request(1));
    assert_eq!(results.len(), 1);
    assert!(!results[0].is_error);
    assert_eq!(results[0].tool_call_id.as_deref(), Some("call_1"));
    let payload: serde_json::Value = serde_json::from_str(&results[0].content).unwrap();
    assert_eq!(payload["start_date"], "2025-03-02");
    assert_eq!(payload["end_date"], "2025-03-08");
}

#[tokio::test]
async fn e2e_write_file_tool_creates_file() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("notes").join("todo.txt");

    let provider = ScriptedProvider::turns(vec![
        calls_turn(vec![call(
            "call_w",
            "write_file",
            json!({"file_path": target.to_string_lossy(), "content": "buy milk"}),
        )]),
        Turn::assistant("Saved."),
    ]);
    let mut registry = ToolRegistry::new();
    registry
        .register_server(Arc::new(corvid_tools::builtin_server()), ServerOptions::unprefixed())
        .await
        .unwrap();

    let mut orch = orchestrator(provider.clone(), Arc::new(registry), Arc::new(InMemorySink::new()));
    let answer = orch
        .handle_request("Write my todo list", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(answer, "Saved.");
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "buy milk");
    assert!(!tool_turns(&provider.request(1))[0].is_error);
}

// ── E2E: dispatch semantics ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn e2e_concurrent_results_keep_request_order() {
    let server = CalendarServer::new("calendar");
    let registry = calendar_registry(server.clone(), ServerOptions::default()).await;

    let provider = ScriptedProvider::turns(vec![
        calls_turn(vec![
            call("slow", "calendar_lookup", json!({"query": "first", "delay_ms": 500})),
            call("fast", "calendar_lookup", json!({"query": "second", "delay_ms": 1})),
            call("mid", "calendar_lookup", json!({"query": "third", "delay_ms": 100})),
        ]),
        Turn::assistant("All three looked up."),
    ]);

    let mut orch = orchestrator(provider.clone(), registry, Arc::new(InMemorySink::new()));
    let answer = orch
        .handle_request("Check three things", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(answer, "All three looked up.");
    assert_eq!(server.invocations(), 3);

    let results = tool_turns(&provider.request(1));
    let ids: Vec<_> = results.iter().filter_map(|t| t.tool_call_id.as_deref()).collect();
    assert_eq!(ids, vec!["slow", "fast", "mid"]);
    let payloads: Vec<_> = results.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(payloads, vec!["calendar:first", "calendar:second", "calendar:third"]);

    // The assistant turn that asked for the calls precedes its results.
    let second = provider.request(1);
    let asked = second
        .turns
        .iter()
        .position(|t| t.has_tool_calls())
        .unwrap();
    let first_result = second.turns.iter().position(|t| t.role == Role::Tool).unwrap();
    assert!(asked < first_result);
}

#[tokio::test(start_paused = true)]
async fn e2e_tool_timeout_becomes_failure_result() {
    let server = CalendarServer::new("calendar");
    let registry = calendar_registry(
        server.clone(),
        ServerOptions {
            prefix_tools: true,
            timeout: Some(Duration::from_secs(1)),
        },
    )
    .await;

    let provider = ScriptedProvider::turns(vec![
        calls_turn(vec![
            call("t1", "calendar_lookup", json!({"query": "hung", "delay_ms": 5_000})),
            call("t2", "calendar_lookup", json!({"query": "quick"})),
        ]),
        Turn::assistant("The calendar timed out, but here is what I found."),
    ]);

    let mut orch = orchestrator(provider.clone(), registry, Arc::new(InMemorySink::new()));
    let answer = orch
        .handle_request("What's on today?", &CancellationToken::new())
        .await
        .unwrap();

    assert!(answer.contains("timed out"));
    let results = tool_turns(&provider.request(1));
    assert!(results[0].is_error);
    assert!(results[0].content.contains("timed out"), "{}", results[0].content);
    assert!(!results[1].is_error);
    assert_eq!(results[1].content, "calendar:quick");
}

#[tokio::test]
async fn e2e_unknown_tool_and_schema_mismatch_are_fed_back() {
    let server = CalendarServer::new("calendar");
    let registry = calendar_registry(server.clone(), ServerOptions::default()).await;

    let provider = ScriptedProvider::turns(vec![
        calls_turn(vec![
            call("u1", "weather_forecast", json!({"city": "Oslo"})),
            call("s1", "calendar_lookup", json!({"query": 42})),
            call("f1", "calendar_lookup", json!({"query": "x", "fail": true})),
        ]),
        Turn::assistant("Some of those tools did not work."),
    ]);

    let mut orch = orchestrator(provider.clone(), registry, Arc::new(InMemorySink::new()));
    orch.handle_request("Do things", &CancellationToken::new())
        .await
        .unwrap();

    let results = tool_turns(&provider.request(1));
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|t| t.is_error));
    assert!(results[0].content.contains("Unknown tool: weather_forecast"));
    assert!(results[1].content.contains("do not match its schema"));
    assert!(results[2].content.contains("calendar backend unavailable"));

    // The schema mismatch never reached the server; the failing call did.
    assert_eq!(server.invocations(), 1);
}

// ── E2E: registry startup ────────────────────────────────────────────────

#[tokio::test]
async fn e2e_duplicate_tool_names_are_rejected() {
    let mut registry = ToolRegistry::new();
    registry
        .register_server(CalendarServer::new("work"), ServerOptions::unprefixed())
        .await
        .unwrap();

    let err = registry
        .register_server(CalendarServer::new("home"), ServerOptions::unprefixed())
        .await
        .unwrap_err();
    match err {
        ToolError::DuplicateTool {
            name,
            first_server,
            second_server,
        } => {
            assert_eq!(name, "lookup");
            assert_eq!(first_server, "work");
            assert_eq!(second_server, "home");
        }
        other => panic!("expected DuplicateTool, got {other:?}"),
    }
    assert_eq!(registry.names(), vec!["lookup"]);
    assert_eq!(registry.server_of("lookup"), Some("work"));
}

#[tokio::test]
async fn e2e_prefixing_keeps_same_named_tools_apart() {
    let mut registry = ToolRegistry::new();
    registry
        .register_server(CalendarServer::new("work"), ServerOptions::default())
        .await
        .unwrap();
    registry
        .register_server(CalendarServer::new("home"), ServerOptions::default())
        .await
        .unwrap();

    assert_eq!(registry.names(), vec!["home_lookup", "work_lookup"]);
    let result = registry
        .dispatch(&call("c", "home_lookup", json!({"query": "dentist"})))
        .await;
    assert!(result.is_success());
}

// ── E2E: orchestration limits ────────────────────────────────────────────

#[tokio::test]
async fn e2e_iteration_limit_stops_endless_tool_calls() {
    let server = CalendarServer::new("calendar");
    let registry = calendar_registry(server.clone(), ServerOptions::default()).await;
    let provider = ScriptedProvider::repeating(calls_turn(vec![call(
        "loop",
        "calendar_lookup",
        json!({"query": "again"}),
    )]));

    let mut orch = Orchestrator::new(
        provider.clone(),
        registry,
        Arc::new(InMemorySink::new()),
        WindowLimits::default(),
        settings(50),
    );
    let err = orch
        .handle_request("Never stop", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::IterationLimitExceeded { limit: 50 }));
    assert_eq!(provider.calls(), 50);
    assert_eq!(server.invocations(), 50);
    assert!(describe_failure(&err).contains("50 model calls"));
}

#[tokio::test]
async fn e2e_context_overflow_is_reported() {
    let provider = ScriptedProvider::new(vec![Err(ProviderError::ContextOverflow(
        "prompt is too long: 210000 tokens > 200000 maximum".into(),
    ))]);
    let mut orch = orchestrator(
        provider.clone(),
        Arc::new(ToolRegistry::new()),
        Arc::new(InMemorySink::new()),
    );

    let err = orch
        .handle_request("Summarize everything", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ContextOverflow(_)));
    assert_eq!(provider.calls(), 1);
    assert!(describe_failure(&err).contains("too large"));
}

#[tokio::test]
async fn e2e_provider_error_ends_request_without_answer() {
    let provider = ScriptedProvider::new(vec![Err(ProviderError::AuthenticationFailed(
        "invalid x-api-key".into(),
    ))]);
    let mut orch = orchestrator(
        provider,
        Arc::new(ToolRegistry::new()),
        Arc::new(InMemorySink::new()),
    );

    let err = orch
        .handle_request("Hello", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Provider(ProviderError::AuthenticationFailed(_))));
    assert_eq!(orch.usage().model_calls, 0);
}

// ── E2E: cancellation ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn e2e_cancel_during_tools_discards_results() {
    let server = CalendarServer::new("calendar");
    let registry = calendar_registry(server.clone(), ServerOptions::default()).await;
    let provider = ScriptedProvider::turns(vec![
        calls_turn(vec![call(
            "slow",
            "calendar_lookup",
            json!({"query": "year", "delay_ms": 1_000}),
        )]),
        Turn::assistant("Fresh start."),
    ]);

    let mut orch = orchestrator(provider.clone(), registry, Arc::new(InMemorySink::new()));
    let cancel = CancellationToken::new();

    let (outcome, _) = tokio::join!(orch.handle_request("Scan the whole year", &cancel), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
    });

    assert!(matches!(outcome, Err(Error::Cancelled)));
    // The call ran to completion, but nothing it produced was kept.
    assert_eq!(server.invocations(), 1);
    assert_eq!(provider.calls(), 1);
    let kept: Vec<_> = orch.window().turns().map(|t| t.role).collect();
    assert_eq!(kept, vec![Role::User]);

    // The next request continues from a consistent conversation.
    let answer = orch
        .handle_request("Never mind", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(answer, "Fresh start.");
    let next = provider.request(1);
    assert!(tool_turns(&next).is_empty());
    assert!(next.turns.iter().all(|t| !t.has_tool_calls()));
}

#[tokio::test]
async fn e2e_cancelled_before_start_makes_no_model_call() {
    let provider = ScriptedProvider::turns(vec![Turn::assistant("unused")]);
    let mut orch = orchestrator(
        provider.clone(),
        Arc::new(ToolRegistry::new()),
        Arc::new(InMemorySink::new()),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orch.handle_request("Hi", &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(provider.calls(), 0);
}

// ── E2E: context window and archive ──────────────────────────────────────

/// A turn whose estimate is exactly `tokens`.
fn sized_turn(index: usize, tokens: usize) -> Turn {
    let body = "x".repeat((tokens - 4) * 4);
    if index % 2 == 0 {
        Turn::user(body)
    } else {
        Turn::assistant(body)
    }
}

#[tokio::test]
async fn e2e_large_conversation_prunes_to_retention_target() {
    let limits = WindowLimits {
        max_context_tokens: 150_000,
        min_recent_turns: 10,
        retention_ratio: 0.5,
    };
    let mut window = ContextWindowManager::new(limits);
    let originals: Vec<Turn> = (0..40).map(|i| sized_turn(i, 4_000)).collect();
    for turn in &originals {
        window.append(turn.clone());
    }
    assert_eq!(window.total_tokens(), 160_000);

    let report = window.enforce_budget().unwrap();
    assert!(window.total_tokens() <= 75_000);
    assert!(window.len() >= 10);
    assert_eq!(window.total_tokens(), window.recompute_tokens());
    assert_eq!(report.turns_removed + window.len(), 40);

    // Survivors are the most recent turns, in order.
    let kept: Vec<_> = window.turns().map(|t| t.id.clone()).collect();
    let expected: Vec<_> = originals[report.turns_removed..]
        .iter()
        .map(|t| t.id.clone())
        .collect();
    assert_eq!(kept, expected);

    let sink = InMemorySink::new();
    let drained = window.drain_pending(&sink).await;
    assert_eq!(drained.ingested.len(), 1);

    let batches = sink.batches().await;
    assert_eq!(batches.len(), 1);
    let archived: Vec<_> = batches[0].turns.iter().map(|t| t.id.clone()).collect();
    let removed: Vec<_> = originals[..report.turns_removed]
        .iter()
        .map(|t| t.id.clone())
        .collect();
    assert_eq!(archived, removed);

    // Nothing is archived twice.
    assert!(window.drain_pending(&sink).await.is_empty());
    assert_eq!(sink.count().await, 1);
}

fn tight_limits() -> WindowLimits {
    WindowLimits {
        max_context_tokens: 100,
        min_recent_turns: 1,
        retention_ratio: 0.5,
    }
}

#[tokio::test]
async fn e2e_pruned_turns_are_archived_on_next_request() {
    let provider = ScriptedProvider::repeating(Turn::assistant("ok"));
    let sink = InMemorySink::new();
    let mut orch = Orchestrator::new(
        provider.clone(),
        Arc::new(ToolRegistry::new()),
        Arc::new(sink.clone()),
        tight_limits(),
        settings(5),
    );

    // 400 characters is 100 tokens plus overhead: over the ceiling on its own.
    let long = "a".repeat(400);
    orch.handle_request(&long, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(orch.window().pending().len(), 1);
    assert_eq!(sink.count().await, 0);

    orch.handle_request("short follow-up", &CancellationToken::new())
        .await
        .unwrap();
    assert!(orch.window().pending().is_empty());
    let batches = sink.batches().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].turns[0].content, long);

    // The pruned turn is no longer sent to the model.
    let last = provider.request(1);
    assert!(last.turns.iter().all(|t| t.content != long));
}

#[tokio::test]
async fn e2e_failed_archive_batch_is_lost_once_and_loop_continues() {
    let provider = ScriptedProvider::repeating(Turn::assistant("ok"));
    let sink = FlakySink::new(1);
    let events = Arc::new(EventBus::default());
    let mut seen = events.subscribe();

    let mut orch = Orchestrator::new(
        provider.clone(),
        Arc::new(ToolRegistry::new()),
        sink.clone(),
        tight_limits(),
        settings(5),
    )
    .with_event_bus(events.clone());

    orch.handle_request(&"b".repeat(400), &CancellationToken::new())
        .await
        .unwrap();
    let lost_id = orch.window().pending().batch_ids()[0].to_string();

    let answer = orch
        .handle_request("still there?", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(answer, "ok");
    assert!(orch.window().pending().is_empty());

    orch.handle_request("and again", &CancellationToken::new())
        .await
        .unwrap();
    let flushed = orch.flush_archive().await;
    assert!(flushed.is_empty());

    assert_eq!(*sink.offered.lock().unwrap(), vec![lost_id.clone()]);
    assert!(sink.stored.lock().unwrap().is_empty());

    let mut lost_events = Vec::new();
    while let Ok(event) = seen.try_recv() {
        if let DomainEvent::ArchiveBatchLost { batch_id, reason, .. } = event.as_ref() {
            lost_events.push((batch_id.clone(), reason.clone()));
        }
    }
    assert_eq!(lost_events.len(), 1);
    assert_eq!(lost_events[0].0, lost_id);
    assert!(lost_events[0].1.contains("disk full"));
}

#[tokio::test]
async fn e2e_file_sink_persists_flushed_batches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.jsonl");
    let provider = ScriptedProvider::repeating(Turn::assistant("noted"));

    let mut orch = Orchestrator::new(
        provider,
        Arc::new(ToolRegistry::new()),
        Arc::new(JsonlFileSink::new(path.clone())),
        tight_limits(),
        settings(5),
    );
    orch.handle_request(&"c".repeat(400), &CancellationToken::new())
        .await
        .unwrap();

    let report = orch.flush_archive().await;
    assert_eq!(report.ingested.len(), 1);

    let stored = JsonlFileSink::read_all(&path).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, report.ingested[0].batch_id);
    assert_eq!(stored[0].turns[0].role, Role::User);
}

#[tokio::test(start_paused = true)]
async fn e2e_cancel_during_start_archives_batch_once() {
    let provider = ScriptedProvider::repeating(Turn::assistant("ok"));
    let sink = Arc::new(SlowAckSink {
        stored: Mutex::new(Vec::new()),
    });
    let mut orch = Orchestrator::new(
        provider.clone(),
        Arc::new(ToolRegistry::new()),
        sink.clone(),
        tight_limits(),
        settings(5),
    );

    orch.handle_request(&"d".repeat(400), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(orch.window().pending().len(), 1);

    // Cancel while the sink is still acknowledging the batch.
    let cancel = CancellationToken::new();
    let (outcome, ()) = tokio::join!(orch.handle_request("next", &cancel), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
    });
    assert!(matches!(outcome, Err(Error::Cancelled)));
    assert_eq!(provider.calls(), 1);
    assert!(orch.window().pending().is_empty());

    orch.handle_request("after", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(sink.stored.lock().unwrap().len(), 1);
    assert!(orch.window().pending().is_empty());
}
