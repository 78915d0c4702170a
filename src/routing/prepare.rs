//! Outbound request preparation: routing, parameter adjustments for the
//! target provider, and translation for Responses API targets.

use serde::Serialize;
use serde_json::{Map, Value};

use super::{ModelRoute, ModelRouter};
use crate::config::AppConfig;
use crate::error::ProxyError;
use crate::protocol::openai_responses::{convert_chat_messages, convert_chat_params};
use crate::util::utc_timestamp;

pub const CONNECTIVITY_TEST_PROMPT: &str =
    "The intention of this request is to test connectivity. Please respond with a single word: OK";

pub const SINGLE_TOOL_CALL_INSTRUCTION: &str = "IMPORTANT: When using tools, call AT MOST one tool \
per response. Never attempt multiple tool calls in a single response. The client does not support \
multiple tool calls in a single response. If multiple tools are needed, choose the next best single \
tool, return exactly one tool call, and wait for the next turn.";

const CONNECTIVITY_TEST_MAX_TOKENS: u64 = 100;

/// Input items and parameters for a Responses API call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponsesPayload {
    pub input: Vec<Value>,
    pub params: Map<String, Value>,
}

/// A request ready to send upstream.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedRequest {
    pub timestamp: String,
    pub calling_method: String,
    #[serde(skip)]
    pub route: ModelRoute,
    /// Chat messages after provider adjustments.
    pub messages: Vec<Value>,
    /// Chat parameters after provider adjustments.
    pub params: Map<String, Value>,
    /// Present when the route targets the Responses API.
    pub responses: Option<ResponsesPayload>,
}

impl PreparedRequest {
    /// The `metadata.trace_name` attached to the outbound parameters.
    #[must_use]
    pub fn trace_name(&self) -> String {
        format!("{}-OUTBOUND-{}", self.timestamp, self.calling_method)
    }
}

/// Route and adjust one outbound chat request.
///
/// # Errors
///
/// Returns [`ProxyError`] when the request cannot be translated for a
/// Responses API target (malformed messages or tool declarations).
pub fn prepare_request(
    router: &ModelRouter,
    config: &AppConfig,
    calling_method: &str,
    model: &str,
    messages: &[Value],
    params: &Map<String, Value>,
    stream: bool,
) -> Result<PreparedRequest, ProxyError> {
    let route = router.route(model);
    let mut prepared = PreparedRequest {
        timestamp: utc_timestamp(),
        calling_method: calling_method.to_string(),
        messages: messages.to_vec(),
        params: params.clone(),
        responses: None,
        route,
    };

    prepared
        .params
        .extend(prepared.route.extra_params.iter().map(|(k, v)| (k.clone(), v.clone())));
    prepared.params.insert("stream".into(), Value::Bool(stream));
    if prepared.route.use_responses_api {
        prepared.params.remove("temperature");
    }

    let trace_name = prepared.trace_name();
    let metadata = prepared
        .params
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    if let Value::Object(metadata) = metadata {
        metadata.insert("trace_name".into(), Value::String(trace_name));
    }

    if !prepared.route.is_target_anthropic {
        adapt_for_non_anthropic(
            &mut prepared.messages,
            &mut prepared.params,
            config.features.enforce_one_tool_call_per_response,
        );
    }

    if prepared.route.use_responses_api {
        prepared.responses = Some(ResponsesPayload {
            input: convert_chat_messages(&prepared.messages)?,
            params: convert_chat_params(&prepared.params)?,
        });
    }

    Ok(prepared)
}

/// Adjust a request so that non-Anthropic models handle it correctly.
fn adapt_for_non_anthropic(
    messages: &mut Vec<Value>,
    params: &mut Map<String, Value>,
    enforce_one_tool_call: bool,
) {
    params.remove("context_management");

    if is_connectivity_test(messages, params) {
        tracing::debug!("rewriting connectivity test request");
        params.insert("max_tokens".into(), Value::from(CONNECTIVITY_TEST_MAX_TOKENS));
        if let Some(Value::Object(message)) = messages.first_mut() {
            message.insert("role".into(), Value::String("system".into()));
            message.insert("content".into(), Value::String(CONNECTIVITY_TEST_PROMPT.into()));
        }
        return;
    }

    if !enforce_one_tool_call {
        return;
    }
    let declared = declaration_count(params.get("tools")) + declaration_count(params.get("functions"));
    if declared < 2 {
        return;
    }
    let mut instruction = Map::with_capacity(2);
    instruction.insert("role".into(), Value::String("system".into()));
    instruction.insert("content".into(), Value::String(SINGLE_TOOL_CALL_INSTRUCTION.into()));
    messages.push(Value::Object(instruction));
}

/// A one-token request with a single `quota`/`test` user message.
fn is_connectivity_test(messages: &[Value], params: &Map<String, Value>) -> bool {
    if params.get("max_tokens").and_then(Value::as_f64) != Some(1.0) {
        return false;
    }
    let [message] = messages else {
        return false;
    };
    message.get("role").and_then(Value::as_str) == Some("user")
        && matches!(
            message.get("content").and_then(Value::as_str),
            Some("quota" | "test")
        )
}

fn declaration_count(value: Option<&Value>) -> usize {
    match value {
        Some(Value::Array(items)) => items.len(),
        Some(Value::Object(obj)) => obj.len(),
        _ => 0,
    }
}
