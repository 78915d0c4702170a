//! Stateless field extraction for Responses API streaming events.

use serde_json::Value;

use super::access::EventFields;
use crate::protocol::canonical::{ProviderFields, FINISH_ERROR, FINISH_STOP};
use crate::util::{is_truthy, value_text};

pub const KIND_PREFIX: &str = "response.";
pub const KIND_TEXT_DELTA: &str = "response.output_text.delta";
pub const KIND_ITEM_ADDED: &str = "response.output_item.added";
pub const KIND_ITEM_DONE: &str = "response.output_item.done";
pub const KIND_ARGUMENTS_DELTA: &str = "response.function_call_arguments.delta";
pub const KIND_ARGUMENTS_DONE: &str = "response.function_call_arguments.done";
pub const KIND_INPUT_JSON_DELTA: &str = "response.input_json.delta";
pub const KIND_ERROR: &str = "response.error";

const TERMINAL_KINDS: &[&str] = &[
    "response.completed",
    "response.failed",
    "response.cancelled",
    "response.canceled",
];
const TERMINAL_SUFFIXES: &[&str] = &[".completed", ".failed", ".cancelled", ".canceled"];
const PASSTHROUGH_KEYS: &[&str] = &["response_id", "output_index", "item_id", "id", "status"];

/// A function/tool call item as announced, closed, or embedded in a final
/// response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallItem {
    pub item_id: Option<String>,
    pub name: Option<String>,
    pub call_id: Option<String>,
    pub arguments: Option<String>,
}

impl CallItem {
    /// Parse a call item; anything whose `type` is not a call yields `None`.
    #[must_use]
    pub fn from_value(item: &Value) -> Option<Self> {
        let item = item.as_object()?;
        let item_type = item.get("type").and_then(Value::as_str)?;
        if item_type != "function_call" && item_type != "tool_call" {
            return None;
        }
        let non_empty = |keys: &[&str]| {
            keys.iter()
                .filter_map(|key| item.get(*key).and_then(Value::as_str))
                .find(|s| !s.is_empty())
                .map(str::to_string)
        };
        let arguments = ["arguments", "input", "input_json"]
            .iter()
            .filter_map(|key| item.get(*key))
            .find(|value| is_truthy(value))
            .map(value_text);
        Some(Self {
            item_id: non_empty(&["id"]),
            name: non_empty(&["name", "function_name", "tool_name"]),
            call_id: non_empty(&["call_id", "tool_call_id", "id"]),
            arguments,
        })
    }
}

/// The closed set of event kinds the accumulator reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    ItemAdded(CallItem),
    /// Argument text for one item, from either the function-arguments or the
    /// input-json delta event.
    ArgumentsDelta { item_id: String, delta: String },
    ArgumentsDone { item_id: String, arguments: Option<String> },
    ItemDone(CallItem),
    /// `completed`/`failed`/`cancelled`, carrying the call items found in the
    /// embedded final response.
    Terminal { calls: Vec<CallItem> },
    Error { calls: Vec<CallItem> },
    TextDelta,
    Other,
}

impl EventKind {
    /// Whether this event ends the turn and resets accumulated state.
    #[must_use]
    pub fn ends_turn(&self) -> bool {
        matches!(self, EventKind::Terminal { .. } | EventKind::Error { .. })
    }
}

/// Everything the normalizer needs from one Responses event.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEvent {
    pub kind: EventKind,
    pub text: String,
    pub index: usize,
    pub finish_reason: String,
    pub is_finished: bool,
    pub provider_fields: ProviderFields,
}

/// Extract a Responses event. Returns `None` for events whose kind does not
/// carry the `response.` prefix.
pub fn extract_event<E: EventFields + ?Sized>(event: &E) -> Option<ExtractedEvent> {
    let kind_name = event
        .str_field("type")
        .filter(|s| !s.is_empty())
        .or_else(|| event.str_field("event").filter(|s| !s.is_empty()))?;
    if !kind_name.starts_with(KIND_PREFIX) {
        return None;
    }

    let index = event
        .int_field("output_index")
        .or_else(|| event.int_field("index"))
        .and_then(|idx| usize::try_from(idx).ok())
        .unwrap_or(0);

    let delta = event.value_field("delta");
    let text = if kind_name == KIND_TEXT_DELTA {
        match delta {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Object(obj)) => obj
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        }
    } else {
        String::new()
    };

    let kind = classify(event, kind_name);

    let is_finished = kind_name == KIND_ERROR
        || TERMINAL_SUFFIXES
            .iter()
            .any(|suffix| kind_name.ends_with(suffix));
    let mut finish_reason = event
        .str_field("finish_reason")
        .unwrap_or_default()
        .to_string();
    if finish_reason.is_empty() {
        if kind_name == KIND_ERROR {
            finish_reason = FINISH_ERROR.to_string();
        } else if is_finished {
            finish_reason = FINISH_STOP.to_string();
        }
    }

    let mut provider_fields = ProviderFields::new();
    provider_fields.insert("responses_type".into(), Value::String(kind_name.to_string()));
    for key in PASSTHROUGH_KEYS {
        if let Some(value) = event.owned_field(key).filter(|value| !value.is_null()) {
            provider_fields.insert((*key).to_string(), value);
        }
    }
    if let Some(delta @ Value::Object(_)) = delta {
        provider_fields.insert("delta".into(), delta.clone());
    }

    Some(ExtractedEvent {
        kind,
        text,
        index,
        finish_reason,
        is_finished,
        provider_fields,
    })
}

fn classify<E: EventFields + ?Sized>(event: &E, kind_name: &str) -> EventKind {
    match kind_name {
        KIND_TEXT_DELTA => EventKind::TextDelta,
        KIND_ITEM_ADDED => event
            .value_field("item")
            .and_then(CallItem::from_value)
            .map_or(EventKind::Other, EventKind::ItemAdded),
        KIND_ITEM_DONE => event
            .value_field("item")
            .and_then(CallItem::from_value)
            .map_or(EventKind::Other, EventKind::ItemDone),
        KIND_ARGUMENTS_DELTA | KIND_INPUT_JSON_DELTA => {
            match (event.str_field("item_id"), event.value_field("delta")) {
                (Some(item_id), Some(Value::String(delta))) => EventKind::ArgumentsDelta {
                    item_id: item_id.to_string(),
                    delta: delta.clone(),
                },
                _ => EventKind::Other,
            }
        }
        KIND_ARGUMENTS_DONE => match event.str_field("item_id") {
            Some(item_id) => EventKind::ArgumentsDone {
                item_id: item_id.to_string(),
                arguments: final_arguments(event.value_field("arguments")),
            },
            None => EventKind::Other,
        },
        KIND_ERROR => EventKind::Error {
            calls: response_calls(event),
        },
        _ if TERMINAL_KINDS.contains(&kind_name) => EventKind::Terminal {
            calls: response_calls(event),
        },
        _ => EventKind::Other,
    }
}

/// Final arguments supplied by a done event, if non-empty.
fn final_arguments(arguments: Option<&Value>) -> Option<String> {
    match arguments? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        structured @ (Value::Array(_) | Value::Object(_)) => Some(structured.to_string()),
        _ => None,
    }
}

fn response_calls<E: EventFields + ?Sized>(event: &E) -> Vec<CallItem> {
    event
        .value_field("response")
        .and_then(|response| response.get("output"))
        .and_then(Value::as_array)
        .map(|output| output.iter().filter_map(CallItem::from_value).collect())
        .unwrap_or_default()
}
