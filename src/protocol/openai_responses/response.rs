use serde_json::{Map, Value};

use crate::error::{CanonicalError, ProxyError};
use crate::protocol::canonical::{
    ChatUsage, FunctionFragment, ProviderFields, FINISH_CANCELLED, FINISH_ERROR, FINISH_STOP,
};
use crate::protocol::content::flatten_text;
use crate::protocol::openai_chat::{ChatChoice, ChatCompletion, ChatMessage, ChatToolCall};
use crate::util::{first_str, is_truthy};

const PASSTHROUGH_FIELDS: &[&str] = &["response", "meta", "trace_id", "previous_response_id"];

/// Translate a complete Responses API result into a chat completion.
///
/// Only the first `function_call`/`tool_call` output item becomes a tool
/// call; it is mirrored into the legacy `function_call` field.
///
/// # Errors
///
/// Returns [`ProxyError`] wrapping [`CanonicalError::InvalidRequest`] when the
/// response is null or not a mapping, or [`CanonicalError::Translation`] when
/// tool-call arguments cannot be encoded.
pub fn translate_response(response: &Value) -> Result<ChatCompletion, ProxyError> {
    let response = match response {
        Value::Object(obj) => obj,
        Value::Null => return Err(CanonicalError::invalid("response cannot be null").into()),
        _ => return Err(CanonicalError::invalid("response must be a mapping").into()),
    };

    let created = ["created", "created_at"]
        .iter()
        .filter_map(|key| response.get(*key))
        .find(|value| is_truthy(value))
        .and_then(|value| value.as_u64().or_else(|| value.as_f64().map(|f| f as u64)));

    let mut text = String::new();
    let mut tool_call: Option<ChatToolCall> = None;
    if let Some(Value::Array(output)) = response.get("output") {
        for item in output.iter().filter_map(Value::as_object) {
            let item_type = first_str(item, &["type", "event"]);
            match item_type {
                Some("message") => {
                    if let Some(content) = item.get("content") {
                        text.push_str(&flatten_text(content));
                    }
                }
                Some("function_call" | "tool_call") if tool_call.is_none() => {
                    tool_call = convert_tool_call(item)?;
                }
                Some("function_call" | "tool_call") => {
                    tracing::debug!("ignoring additional tool call item in response output");
                }
                _ => {}
            }
        }
    }

    let finish_reason = match response.get("status").and_then(Value::as_str) {
        Some("completed") => Some(FINISH_STOP.to_string()),
        Some("cancelled" | "canceled") => Some(FINISH_CANCELLED.to_string()),
        Some("failed") => Some(FINISH_ERROR.to_string()),
        _ => None,
    };

    let function_call = tool_call.as_ref().map(|call| call.function.clone());
    let message = ChatMessage {
        role: "assistant".to_string(),
        content: text,
        tool_calls: tool_call.map(|call| vec![call]),
        function_call,
    };

    let provider_fields: ProviderFields = PASSTHROUGH_FIELDS
        .iter()
        .filter_map(|key| {
            response
                .get(*key)
                .filter(|value| !value.is_null())
                .map(|value| ((*key).to_string(), value.clone()))
        })
        .collect();

    Ok(ChatCompletion {
        id: response.get("id").and_then(Value::as_str).map(str::to_string),
        object: "chat.completion".to_string(),
        created,
        model: response.get("model").and_then(Value::as_str).map(str::to_string),
        choices: vec![ChatChoice {
            index: 0,
            finish_reason,
            message,
        }],
        usage: response
            .get("usage")
            .and_then(Value::as_object)
            .map(convert_usage),
        metadata: response.get("metadata").filter(|value| !value.is_null()).cloned(),
        provider_specific_fields: (!provider_fields.is_empty()).then_some(provider_fields),
    })
}

fn convert_usage(usage: &Map<String, Value>) -> ChatUsage {
    let tokens = |keys: &[&str]| keys.iter().find_map(|key| usage.get(*key).and_then(Value::as_u64));
    let prompt_tokens = tokens(&["prompt_tokens", "input_tokens"]);
    let completion_tokens = tokens(&["completion_tokens", "output_tokens"]);
    let total_tokens = tokens(&["total_tokens"]).or_else(|| match (prompt_tokens, completion_tokens) {
        (Some(prompt), Some(completion)) => Some(prompt.saturating_add(completion)),
        _ => None,
    });
    ChatUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    }
}

/// Convert one output call item. Items without a name produce `None`.
fn convert_tool_call(item: &Map<String, Value>) -> Result<Option<ChatToolCall>, CanonicalError> {
    let Some(name) = first_str(item, &["name", "function_name"]) else {
        return Ok(None);
    };
    let id = first_str(item, &["id", "call_id", "tool_call_id"]).map(str::to_string);

    let raw_arguments = match item.get("arguments") {
        Some(value) if !value.is_null() => Some(value),
        _ => ["input", "input_arguments"]
            .iter()
            .filter_map(|key| item.get(*key))
            .find(|value| is_truthy(value)),
    };
    let arguments = match raw_arguments {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(structured @ (Value::Array(_) | Value::Object(_))) => {
            let flattened = flatten_text(structured);
            if flattened.is_empty() {
                serde_json::to_string(structured)
                    .map_err(|err| CanonicalError::translation("tool call arguments", err))?
            } else {
                flattened
            }
        }
        Some(scalar) => scalar.to_string(),
    };

    Ok(Some(ChatToolCall {
        id,
        kind: "function".to_string(),
        function: FunctionFragment {
            name: Some(name.to_string()),
            arguments: Some(arguments),
        },
    }))
}
