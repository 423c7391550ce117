//! Tool registry and dispatcher.
//!
//! Every connected [`ToolServer`] is listed once at startup and its tools are
//! flattened into one namespace. The registry:
//! 1. Hands tool schemas to the orchestrator for each LLM request
//! 2. Validates a call's arguments against the tool's JSON Schema
//! 3. Routes the call to its server with a per-tool timeout
//!
//! Dispatch never raises: every failure comes back as a
//! [`ToolCallResult`] the LLM can read.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use corvid_core::error::ToolError;
use corvid_core::provider::ToolDefinition;
use corvid_core::tool::{ToolCallRequest, ToolCallResult, ToolServer};
use serde_json::Value;
use tracing::{debug, info, warn};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_RESULT_LENGTH: usize = 10_000;

/// How a server's tools are exposed.
#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// Expose tools as `<server>_<tool>`.
    pub prefix_tools: bool,

    /// Per-call timeout for this server's tools. Falls back to the registry
    /// default.
    pub timeout: Option<Duration>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            prefix_tools: true,
            timeout: None,
        }
    }
}

impl ServerOptions {
    /// Tools keep their own names.
    pub fn unprefixed() -> Self {
        Self {
            prefix_tools: false,
            timeout: None,
        }
    }
}

struct RegisteredTool {
    /// Definition under the exposed name.
    definition: ToolDefinition,
    /// Name the server knows the tool by.
    remote_name: String,
    server: Arc<dyn ToolServer>,
    validator: Option<jsonschema::Validator>,
    timeout: Duration,
}

/// A call whose tool exists and whose arguments match its schema.
pub struct ValidatedCall {
    pub call_id: String,
    pub exposed_name: String,
    pub remote_name: String,
    pub arguments: Value,
    pub timeout: Duration,
    server: Arc<dyn ToolServer>,
}

impl ValidatedCall {
    /// Name of the server that owns the tool.
    pub fn server_name(&self) -> &str {
        self.server.name()
    }
}

/// Flattened view of every tool on every connected server.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    servers: Vec<Arc<dyn ToolServer>>,
    default_timeout: Duration,
    max_result_length: usize,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            servers: Vec::new(),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
            max_result_length: DEFAULT_MAX_RESULT_LENGTH,
        }
    }

    /// Timeout for servers registered without their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Successful payloads longer than this many characters are truncated.
    pub fn with_max_result_length(mut self, max: usize) -> Self {
        self.max_result_length = max;
        self
    }

    /// List a server's tools and add them to the registry.
    ///
    /// Fails with [`ToolError::DuplicateTool`] when an exposed name is already
    /// taken; in that case none of the server's tools are added. Returns the
    /// number of tools registered.
    pub async fn register_server(
        &mut self,
        server: Arc<dyn ToolServer>,
        options: ServerOptions,
    ) -> Result<usize, ToolError> {
        let server_name = server.name().to_string();
        let listed = server.list_tools().await?;
        let timeout = options.timeout.unwrap_or(self.default_timeout);

        let mut staged: Vec<RegisteredTool> = Vec::with_capacity(listed.len());
        for tool in listed {
            let (exposed, description) = if options.prefix_tools {
                (
                    format!("{server_name}_{}", tool.name),
                    format!("[{server_name}] {}", tool.description),
                )
            } else {
                (tool.name.clone(), tool.description.clone())
            };

            let taken_by = self
                .tools
                .get(&exposed)
                .map(|t| t.server.name().to_string())
                .or_else(|| {
                    staged
                        .iter()
                        .any(|t| t.definition.name == exposed)
                        .then(|| server_name.clone())
                });
            if let Some(first_server) = taken_by {
                return Err(ToolError::DuplicateTool {
                    name: exposed,
                    first_server,
                    second_server: server_name,
                });
            }

            let validator = match jsonschema::validator_for(&tool.parameters) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(tool = %exposed, error = %e, "Tool schema does not compile; arguments will not be validated");
                    None
                }
            };

            staged.push(RegisteredTool {
                definition: ToolDefinition {
                    name: exposed,
                    description,
                    parameters: tool.parameters,
                },
                remote_name: tool.name,
                server: server.clone(),
                validator,
                timeout,
            });
        }

        let count = staged.len();
        for tool in staged {
            debug!(tool = %tool.definition.name, server = %server_name, "Registered tool");
            self.tools.insert(tool.definition.name.clone(), tool);
        }
        self.servers.push(server);
        info!(server = %server_name, tools = count, "Tool server registered");
        Ok(count)
    }

    /// Tool schemas for the LLM, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Exposed tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Server owning an exposed tool name.
    pub fn server_of(&self, name: &str) -> Option<&str> {
        self.tools.get(name).map(|t| t.server.name())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Look up a call's tool and check its arguments against the schema.
    pub fn resolve(&self, request: &ToolCallRequest) -> Result<ValidatedCall, ToolError> {
        let tool = self
            .tools
            .get(&request.name)
            .ok_or_else(|| ToolError::UnknownTool(request.name.clone()))?;

        if let Some(validator) = &tool.validator {
            let problems: Vec<String> = validator
                .iter_errors(&request.arguments)
                .map(|e| {
                    let path = e.instance_path().to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect();
            if !problems.is_empty() {
                return Err(ToolError::SchemaMismatch {
                    tool_name: request.name.clone(),
                    reason: problems.join("; "),
                });
            }
        }

        Ok(ValidatedCall {
            call_id: request.id.clone(),
            exposed_name: request.name.clone(),
            remote_name: tool.remote_name.clone(),
            arguments: request.arguments.clone(),
            timeout: tool.timeout,
            server: tool.server.clone(),
        })
    }

    /// Execute one call. Failures are returned as data, never raised.
    pub async fn dispatch(&self, request: &ToolCallRequest) -> ToolCallResult {
        let call = match self.resolve(request) {
            Ok(call) => call,
            Err(e) => {
                warn!(tool = %request.name, error = %e, "Tool call rejected");
                return ToolCallResult::failure(request, e);
            }
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(
            call.timeout,
            call.server.invoke(&call.remote_name, call.arguments),
        )
        .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(payload)) => {
                debug!(tool = %request.name, duration_ms, bytes = payload.len(), "Tool call succeeded");
                ToolCallResult::success(request, self.truncate(payload))
            }
            Ok(Err(e)) => {
                warn!(tool = %request.name, duration_ms, error = %e, "Tool call failed");
                ToolCallResult::failure(request, e)
            }
            Err(_) => {
                warn!(tool = %request.name, timeout_secs = call.timeout.as_secs(), "Tool call timed out");
                ToolCallResult::failure(
                    request,
                    ToolError::Timeout {
                        tool_name: request.name.clone(),
                        timeout_secs: call.timeout.as_secs(),
                    },
                )
            }
        }
    }

    fn truncate(&self, payload: String) -> String {
        let total = payload.chars().count();
        if total <= self.max_result_length {
            return payload;
        }
        let kept: String = payload.chars().take(self.max_result_length).collect();
        format!(
            "{kept}\n[truncated: {} of {total} characters omitted]",
            total - self.max_result_length
        )
    }

    /// Shut down every registered server.
    pub async fn shutdown_all(&self) {
        for server in &self.servers {
            server.shutdown().await;
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use corvid_core::tool::ToolOutcome;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// An in-process server whose tools echo their arguments.
    ///
    /// Arguments may carry `delay_ms` to sleep before answering and `fail`
    /// to return an invocation failure.
    pub(crate) struct EchoServer {
        pub name: String,
        pub tools: Vec<&'static str>,
        pub shut_down: AtomicBool,
    }

    impl EchoServer {
        pub(crate) fn new(name: &str, tools: &[&'static str]) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                tools: tools.to_vec(),
                shut_down: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl ToolServer for EchoServer {
        fn name(&self) -> &str {
            &self.name
        }

        async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
            Ok(self
                .tools
                .iter()
                .map(|tool| ToolDefinition {
                    name: tool.to_string(),
                    description: format!("Echo via {tool}"),
                    parameters: json!({
                        "type": "object",
                        "properties": {
                            "text": {"type": "string"},
                            "delay_ms": {"type": "integer", "minimum": 0},
                            "fail": {"type": "boolean"}
                        },
                        "required": ["text"]
                    }),
                })
                .collect())
        }

        async fn invoke(&self, tool: &str, arguments: Value) -> Result<String, ToolError> {
            if let Some(delay) = arguments["delay_ms"].as_u64() {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if arguments["fail"].as_bool() == Some(true) {
                return Err(ToolError::InvocationFailed {
                    tool_name: tool.into(),
                    reason: "asked to fail".into(),
                });
            }
            Ok(format!("{tool}:{}", arguments["text"].as_str().unwrap_or_default()))
        }

        async fn shutdown(&self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }
    }

    fn call(name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: format!("call-{name}"),
            name: name.into(),
            arguments,
        }
    }

    fn failure(result: &ToolCallResult) -> &ToolError {
        match &result.outcome {
            ToolOutcome::Failure(e) => e,
            ToolOutcome::Success(payload) => panic!("expected failure, got {payload}"),
        }
    }

    #[tokio::test]
    async fn prefixed_registration() {
        let mut registry = ToolRegistry::new();
        let count = registry
            .register_server(EchoServer::new("calendar", &["list_events"]), ServerOptions::default())
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(registry.names(), vec!["calendar_list_events"]);
        assert_eq!(registry.server_of("calendar_list_events"), Some("calendar"));

        let defs = registry.definitions();
        assert!(defs[0].description.starts_with("[calendar] "));

        let result = registry
            .dispatch(&call("calendar_list_events", json!({"text": "hi"})))
            .await;
        // The server sees its own tool name.
        assert!(matches!(&result.outcome, ToolOutcome::Success(p) if p == "list_events:hi"));
    }

    #[tokio::test]
    async fn duplicate_names_fail_registration() {
        let mut registry = ToolRegistry::new();
        registry
            .register_server(EchoServer::new("mail", &["search"]), ServerOptions::unprefixed())
            .await
            .unwrap();

        let err = registry
            .register_server(EchoServer::new("files", &["search", "read"]), ServerOptions::unprefixed())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::DuplicateTool { ref name, ref first_server, ref second_server }
                if name == "search" && first_server == "mail" && second_server == "files"
        ));
        // Nothing from the rejected server was added.
        assert_eq!(registry.names(), vec!["search"]);
    }

    #[tokio::test]
    async fn prefixing_avoids_collisions() {
        let mut registry = ToolRegistry::new();
        registry
            .register_server(EchoServer::new("mail", &["search"]), ServerOptions::default())
            .await
            .unwrap();
        registry
            .register_server(EchoServer::new("files", &["search"]), ServerOptions::default())
            .await
            .unwrap();
        assert_eq!(registry.names(), vec!["files_search", "mail_search"]);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failure_result() {
        let registry = ToolRegistry::new();
        let result = registry.dispatch(&call("launch_rockets", json!({}))).await;
        assert_eq!(result.call_id, "call-launch_rockets");
        assert!(matches!(failure(&result), ToolError::UnknownTool(n) if n == "launch_rockets"));
    }

    #[tokio::test]
    async fn schema_mismatch_is_reported_with_path() {
        let mut registry = ToolRegistry::new();
        registry
            .register_server(EchoServer::new("echo", &["say"]), ServerOptions::unprefixed())
            .await
            .unwrap();

        let missing = registry.resolve(&call("say", json!({}))).err().unwrap();
        assert!(matches!(missing, ToolError::SchemaMismatch { .. }));

        let wrong_type = registry
            .resolve(&call("say", json!({"text": "x", "delay_ms": "soon"})))
            .err()
            .unwrap();
        let ToolError::SchemaMismatch { reason, .. } = wrong_type else {
            panic!("expected schema mismatch");
        };
        assert!(reason.contains("/delay_ms"), "{reason}");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let mut registry = ToolRegistry::new();
        registry
            .register_server(
                EchoServer::new("echo", &["say"]),
                ServerOptions {
                    prefix_tools: false,
                    timeout: Some(Duration::from_secs(2)),
                },
            )
            .await
            .unwrap();

        let result = registry
            .dispatch(&call("say", json!({"text": "x", "delay_ms": 5_000})))
            .await;
        assert!(matches!(failure(&result), ToolError::Timeout { timeout_secs: 2, .. }));
    }

    #[tokio::test]
    async fn server_error_is_a_failure_result() {
        let mut registry = ToolRegistry::new();
        registry
            .register_server(EchoServer::new("echo", &["say"]), ServerOptions::unprefixed())
            .await
            .unwrap();
        let result = registry
            .dispatch(&call("say", json!({"text": "x", "fail": true})))
            .await;
        assert!(matches!(failure(&result), ToolError::InvocationFailed { .. }));
    }

    #[tokio::test]
    async fn long_payloads_are_truncated() {
        let mut registry = ToolRegistry::new().with_max_result_length(10);
        registry
            .register_server(EchoServer::new("echo", &["say"]), ServerOptions::unprefixed())
            .await
            .unwrap();
        let result = registry
            .dispatch(&call("say", json!({"text": "abcdefghijklmnop"})))
            .await;
        let ToolOutcome::Success(payload) = &result.outcome else {
            panic!("expected success");
        };
        // "say:abcdefghijklmnop" is 20 characters.
        assert!(payload.starts_with("say:abcdef\n"));
        assert!(payload.contains("10 of 20 characters omitted"));
    }

    #[tokio::test]
    async fn uncompilable_schema_skips_validation() {
        struct OddServer;

        #[async_trait]
        impl ToolServer for OddServer {
            fn name(&self) -> &str {
                "odd"
            }
            async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
                Ok(vec![ToolDefinition {
                    name: "anything".into(),
                    description: String::new(),
                    parameters: json!({"type": "not-a-type"}),
                }])
            }
            async fn invoke(&self, _tool: &str, _arguments: Value) -> Result<String, ToolError> {
                Ok("ok".into())
            }
        }

        let mut registry = ToolRegistry::new();
        registry
            .register_server(Arc::new(OddServer), ServerOptions::unprefixed())
            .await
            .unwrap();
        let result = registry.dispatch(&call("anything", json!([1, 2]))).await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn shutdown_reaches_every_server() {
        let a = EchoServer::new("a", &["one"]);
        let b = EchoServer::new("b", &["two"]);
        let mut registry = ToolRegistry::new();
        registry.register_server(a.clone(), ServerOptions::default()).await.unwrap();
        registry.register_server(b.clone(), ServerOptions::default()).await.unwrap();

        registry.shutdown_all().await;
        assert!(a.shut_down.load(Ordering::SeqCst));
        assert!(b.shut_down.load(Ordering::SeqCst));
    }
}
