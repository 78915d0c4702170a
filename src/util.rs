use serde_json::{Map, Value};

/// Loose truthiness of a JSON value: `null`, `false`, zero, and empty
/// strings, arrays or objects are all falsy.
#[inline]
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(obj) => !obj.is_empty(),
    }
}

/// First truthy value among `keys`, in order.
#[inline]
pub(crate) fn first_truthy<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| is_truthy(value))
}

/// First non-empty string among `keys`, in order.
#[inline]
pub(crate) fn first_str<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| obj.get(*key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

/// Render a value as text: strings verbatim, everything else as compact JSON.
#[inline]
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Pull the JSON payload out of one captured SSE or JSON-lines line.
///
/// Comments, `event:` lines, blank lines and the `[DONE]` sentinel yield `None`.
#[inline]
pub(crate) fn extract_sse_data_payload(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') || trimmed.starts_with("event:") {
        return None;
    }
    let payload = trimmed
        .strip_prefix("data:")
        .map_or(trimmed, str::trim_start)
        .trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    Some(payload)
}

/// UTC timestamp with millisecond precision, `YYYYmmdd_HHMMSS_fff`.
pub(crate) fn utc_timestamp() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}
