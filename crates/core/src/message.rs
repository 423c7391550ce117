//! Turn domain type.
//!
//! A turn is one message unit of a conversation: the user's text, an
//! assistant reply (possibly requesting tool calls), or the result of one
//! tool call. Turns are immutable once appended to a conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::{ToolCallRequest, ToolCallResult, ToolOutcome};

/// The role of a turn in a conversation.
///
/// The system prompt is not a turn: it is sent separately with every request
/// and is never subject to pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// Tool execution result
    Tool,
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID
    pub id: String,

    /// Who produced this turn
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Set on tool-result turns whose call failed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,

    /// When the turn was created
    pub created_at: DateTime<Utc>,
}

impl Turn {
    fn new(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
            created_at: Utc::now(),
        }
    }

    /// Create a new user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    /// Create a new assistant turn with a final answer or interim text.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    /// Create an assistant turn that requests tool calls.
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        let mut turn = Self::new(Role::Assistant, content.into());
        turn.tool_calls = calls;
        turn
    }

    /// Create a tool-result turn from a dispatch result.
    pub fn tool_result(result: &ToolCallResult) -> Self {
        let (content, is_error) = match &result.outcome {
            ToolOutcome::Success(payload) => (payload.clone(), false),
            ToolOutcome::Failure(err) => (format!("Error calling tool: {err}"), true),
        };
        let mut turn = Self::new(Role::Tool, content);
        turn.tool_call_id = Some(result.call_id.clone());
        turn.is_error = is_error;
        turn
    }

    /// Whether the assistant asked for tools in this turn.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
