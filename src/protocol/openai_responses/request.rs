//! Outbound request conversion from the chat message grammar into Responses
//! API input items and parameters.

use serde_json::{Map, Value};

use crate::error::CanonicalError;
use crate::protocol::canonical::ChatRole;
use crate::protocol::content::{flatten_text, normalize_message_content};
use crate::protocol::tools::{convert_functions, convert_tool_choice, convert_tools};
use crate::util::{first_str, first_truthy, value_text};

const MESSAGE_KEYS_TO_DROP: &[&str] = &["content", "tool_calls", "function_call"];
const UNSUPPORTED_PARAMS: &[&str] = &["stream_options"];

/// Return a copy of chat parameters adjusted for the Responses API.
///
/// Parallel tool calls are always disabled: callers execute one tool per turn.
///
/// # Errors
///
/// Returns [`CanonicalError::InvalidRequest`] when `tools` or `functions`
/// have an unusable shape.
pub fn convert_chat_params(
    params: &Map<String, Value>,
) -> Result<Map<String, Value>, CanonicalError> {
    let mut out = params.clone();
    out.insert("parallel_tool_calls".into(), Value::Bool(false));

    if let Some(tools) = out.get("tools").filter(|tools| !tools.is_null()) {
        let converted = convert_tools(tools)?;
        if converted.is_empty() {
            out.remove("tools");
        } else {
            out.insert("tools".into(), Value::Array(converted));
        }
    }

    if let Some(functions) = out.remove("functions") {
        let function_tools = convert_functions(&functions)?;
        if !function_tools.is_empty() {
            let tools = out
                .entry("tools")
                .or_insert_with(|| Value::Array(Vec::new()));
            match tools {
                Value::Array(existing) => existing.extend(function_tools),
                other => *other = Value::Array(function_tools),
            }
        }
    }

    if let Some(choice) = out.get("tool_choice").filter(|choice| !choice.is_null()) {
        match convert_tool_choice(choice) {
            Some(converted) => {
                out.insert("tool_choice".into(), converted);
            }
            None => {
                tracing::debug!("dropping unresolvable tool_choice");
                out.remove("tool_choice");
            }
        }
    }

    for key in UNSUPPORTED_PARAMS {
        out.remove(*key);
    }
    Ok(out)
}

/// Convert chat messages into an ordered list of Responses input items.
///
/// # Errors
///
/// Returns [`CanonicalError::InvalidRequest`] for a message that is not a
/// mapping or lacks a non-empty `role`.
pub fn convert_chat_messages(messages: &[Value]) -> Result<Vec<Value>, CanonicalError> {
    let mut converted = Vec::with_capacity(messages.len());
    let mut last_call_id: Option<String> = None;

    for (idx, message) in messages.iter().enumerate() {
        let Some(message) = message.as_object() else {
            return Err(CanonicalError::invalid(format!(
                "chat message at index {idx} must be a mapping"
            )));
        };
        let Some(role) = message.get("role").and_then(Value::as_str).filter(|r| !r.is_empty())
        else {
            return Err(CanonicalError::invalid(format!(
                "chat message at index {idx} is missing a valid role"
            )));
        };

        if role == "assistant" {
            if let Some(Value::Array(tool_calls)) = message.get("tool_calls") {
                for tool_call in tool_calls {
                    let Some(item) = function_call_item(tool_call, idx, messages) else {
                        tracing::debug!(index = idx, "skipping malformed assistant tool call");
                        continue;
                    };
                    last_call_id = item
                        .get("call_id")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    converted.push(Value::Object(item));
                }
            }
        }

        if role == "tool" {
            let call_id = first_str(message, &["tool_call_id", "call_id"])
                .map(str::to_string)
                .or_else(|| last_call_id.clone())
                .unwrap_or_else(|| format!("fc_{idx}"));
            let output = match message.get("content") {
                Some(list @ Value::Array(_)) => flatten_text(list),
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
                None => Value::Null.to_string(),
            };
            let mut item = Map::with_capacity(3);
            item.insert("type".into(), Value::String("function_call_output".into()));
            item.insert("call_id".into(), Value::String(call_id));
            item.insert("output".into(), Value::String(output));
            converted.push(Value::Object(item));
            continue;
        }

        let mut item: Map<String, Value> = message
            .iter()
            .filter(|(key, _)| !MESSAGE_KEYS_TO_DROP.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let parts = normalize_message_content(ChatRole::from_wire(role), message.get("content"));
        item.insert("content".into(), Value::Array(parts));
        converted.push(Value::Object(item));
    }

    Ok(converted)
}

/// Explode one assistant tool call into a `function_call` item.
fn function_call_item(tool_call: &Value, idx: usize, messages: &[Value]) -> Option<Map<String, Value>> {
    let tool_call = tool_call.as_object()?;
    let function = match tool_call.get("function") {
        Some(Value::Object(function)) => Some(function),
        Some(value) if crate::util::is_truthy(value) => return None,
        _ => None,
    };

    let name = function
        .and_then(|f| first_truthy(f, &["name"]))
        .or_else(|| first_truthy(tool_call, &["name"]))
        .cloned()
        .unwrap_or(Value::Null);
    let arguments = function
        .and_then(|f| first_truthy(f, &["arguments"]))
        .or_else(|| first_truthy(tool_call, &["arguments"]))
        .map_or_else(String::new, value_text);

    let call_id = first_str(tool_call, &["id", "call_id", "tool_call_id"])
        .map(str::to_string)
        .or_else(|| peek_tool_call_id(&messages[idx + 1..]))
        .unwrap_or_else(|| format!("fc_{idx}"));

    let mut item = Map::with_capacity(4);
    item.insert("type".into(), Value::String("function_call".into()));
    item.insert("call_id".into(), Value::String(call_id));
    item.insert("name".into(), name);
    item.insert("arguments".into(), Value::String(arguments));
    Some(item)
}

/// Call id of the next tool message that names one.
fn peek_tool_call_id(rest: &[Value]) -> Option<String> {
    rest.iter()
        .filter_map(Value::as_object)
        .filter(|message| message.get("role").and_then(Value::as_str) == Some("tool"))
        .find_map(|message| first_str(message, &["tool_call_id", "call_id"]))
        .map(str::to_string)
}
