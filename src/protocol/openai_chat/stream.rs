use serde_json::{Map, Value};

use crate::protocol::canonical::{GenericChunk, ToolUseFragment};
use crate::stream::access::EventFields;
use crate::util::value_text;

/// Normalize a chat-completion stream chunk. Returns `None` unless the event
/// carries a non-empty `choices` list; only the first choice is read.
pub fn normalize_chat_chunk<E: EventFields + ?Sized>(event: &E) -> Option<GenericChunk> {
    let choice = event
        .value_field("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())?;

    let mut chunk = GenericChunk {
        provider_specific_fields: event
            .value_field("provider_specific_fields")
            .and_then(Value::as_object)
            .cloned(),
        ..GenericChunk::default()
    };

    if let Some(delta) = choice.get("delta").and_then(Value::as_object) {
        if let Some(content) = delta.get("content").and_then(Value::as_str) {
            chunk.text = content.to_string();
        }
        chunk.tool_use = delta_tool_call(delta)
            .or_else(|| delta_tool_use_block(delta))
            .or_else(|| delta_function_call(delta));
    }

    if chunk.text.is_empty() {
        if let Some(text) = choice.get("text").and_then(Value::as_str) {
            chunk.text = text.to_string();
        }
    }

    if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
        chunk.finish_reason = reason.to_string();
        chunk.is_finished = !reason.is_empty();
    }
    if let Some(index) = choice
        .get("index")
        .and_then(Value::as_u64)
        .and_then(|idx| usize::try_from(idx).ok())
    {
        chunk.index = index;
    }
    Some(chunk)
}

fn opt_string(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

/// Stringify partial arguments; structured values become JSON text.
fn arguments_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        other => Some(value_text(other)),
    }
}

fn delta_tool_call(delta: &Map<String, Value>) -> Option<ToolUseFragment> {
    let call = delta
        .get("tool_calls")
        .and_then(Value::as_array)
        .and_then(|calls| calls.first())?;
    let function = call.get("function");
    let index = call
        .get("index")
        .and_then(Value::as_u64)
        .and_then(|idx| usize::try_from(idx).ok())
        .unwrap_or(0);
    let mut fragment = ToolUseFragment::function(
        index,
        opt_string(call.get("id")),
        opt_string(function.and_then(|f| f.get("name"))),
        arguments_text(function.and_then(|f| f.get("arguments"))),
    );
    if let Some(kind) = call.get("type").and_then(Value::as_str) {
        fragment.kind = kind.to_string();
    }
    Some(fragment)
}

fn delta_tool_use_block(delta: &Map<String, Value>) -> Option<ToolUseFragment> {
    let block = delta.get("tool_use").filter(|block| !block.is_null())?;
    Some(ToolUseFragment::function(
        0,
        opt_string(block.get("id")),
        opt_string(block.get("name")),
        arguments_text(block.get("input")),
    ))
}

fn delta_function_call(delta: &Map<String, Value>) -> Option<ToolUseFragment> {
    let call = delta.get("function_call").filter(|call| !call.is_null())?;
    Some(ToolUseFragment::function(
        0,
        None,
        opt_string(call.get("name")),
        arguments_text(call.get("arguments")),
    ))
}
