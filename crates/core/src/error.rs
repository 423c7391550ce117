//! Error types for the corvid domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum. [`Error`] holds what can end
//! a request; tool and archive failures are reported as data instead.

use thiserror::Error;

/// The top-level error type for all corvid operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Orchestration outcomes ---
    #[error("Iteration limit exceeded: no final answer after {limit} model calls")]
    IterationLimitExceeded { limit: usize },

    #[error("Context overflow: {0}")]
    ContextOverflow(String),

    #[error("Request cancelled")]
    Cancelled,
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// The backend rejected the request because it exceeds the model's context.
    #[error("Context length exceeded: {0}")]
    ContextOverflow(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether an error body describes a context-length rejection.
    ///
    /// Backends do not agree on a status code or error type for this, so the
    /// message text is the only reliable signal.
    pub fn is_context_overflow_message(body: &str) -> bool {
        let lower = body.to_lowercase();
        lower.contains("context_length_exceeded")
            || lower.contains("maximum context length")
            || lower.contains("prompt is too long")
            || lower.contains("too many tokens")
            || lower.contains("context window")
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Arguments for {tool_name} do not match its schema: {reason}")]
    SchemaMismatch { tool_name: String, reason: String },

    #[error("Tool invocation failed: {tool_name}: {reason}")]
    InvocationFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Tool name {name} is exposed by both {first_server} and {second_server}")]
    DuplicateTool {
        name: String,
        first_server: String,
        second_server: String,
    },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Tool server transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Batch rejected by sink: {0}")]
    Rejected(String),
}
