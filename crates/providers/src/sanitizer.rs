//! Recovery of tool calls that a model wrote into its text reply.
//!
//! Small local models often answer with a bare JSON object such as
//! `{"name": "calculate_date_range", "arguments": {"period": "today"}}`
//! instead of using the structured tool-call channel. When the object names a
//! tool that was offered in the request, it is turned into a real call.

use corvid_core::provider::ToolDefinition;
use corvid_core::tool::ToolCallRequest;
use serde_json::Value;

const NAME_KEYS: &[&str] = &["name", "function_name"];
const ARGUMENT_KEYS: &[&str] = &["arguments", "function_arg", "args"];

/// A new opaque call id for calls the backend did not label.
pub fn fresh_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Extract a single tool call from `text`, if it carries one for a known tool.
pub fn extract_tool_call(text: &str, known: &[ToolDefinition]) -> Option<ToolCallRequest> {
    if !text.contains('{') || !text.contains("\"name\"") || !text.contains("\"arguments\"") {
        return None;
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }

    let object: Value = serde_json::from_str(&text[start..=end]).ok()?;
    let name = NAME_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))?;

    if !known.iter().any(|tool| tool.name == name) {
        return None;
    }

    let arguments = ARGUMENT_KEYS
        .iter()
        .find_map(|key| object.get(*key))
        .map(|args| match args {
            // Some models double-encode the arguments object.
            Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| args.clone()),
            other => other.clone(),
        })
        .unwrap_or_else(|| serde_json::json!({}));

    Some(ToolCallRequest {
        id: fresh_call_id(),
        name: name.to_string(),
        arguments,
    })
}
