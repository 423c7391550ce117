//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 bytes per token, rounded up.
//! Byte length over-counts non-ASCII text, so the estimate errs high, which
//! is the safe direction for a budget check.

use corvid_core::message::Turn;
use corvid_core::provider::ToolDefinition;

/// Framing cost of one turn on the wire (role name, delimiters).
pub const TURN_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 bytes. Rounds up.
pub fn estimate_text(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for a single turn including per-turn overhead.
///
/// Tool calls the assistant requested count as their name plus the JSON
/// encoding of their arguments.
pub fn estimate_turn(turn: &Turn) -> usize {
    let calls: usize = turn
        .tool_calls
        .iter()
        .map(|call| estimate_text(&call.name) + estimate_text(&call.arguments.to_string()))
        .sum();
    TURN_OVERHEAD + estimate_text(&turn.content) + calls
}

/// Estimate tokens for a slice of turns.
pub fn estimate_conversation(turns: &[Turn]) -> usize {
    turns.iter().map(estimate_turn).sum()
}

/// Estimate tokens for tool definitions (serialized as JSON).
pub fn estimate_tools(tools: &[ToolDefinition]) -> usize {
    tools
        .iter()
        .map(|t| estimate_text(&serde_json::to_string(t).unwrap_or_default()))
        .sum()
}
