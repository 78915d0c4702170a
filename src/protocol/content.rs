//! Message content conversion between the chat grammar and the flat-item
//! grammar, plus the flattening used when going back to plain text.

use serde_json::{Map, Value};

use super::canonical::ChatRole;

const CONTENT_KEYS_TO_DROP: &[&str] = &["cache_control"];

/// Default part type for a plain string from the given role.
#[must_use]
pub fn default_part_type(role: ChatRole) -> &'static str {
    match role {
        ChatRole::Assistant => "output_text",
        ChatRole::Tool => "tool_result",
        ChatRole::System | ChatRole::Developer | ChatRole::User => "input_text",
    }
}

fn input_type_alias(part_type: &str) -> Option<&'static str> {
    Some(match part_type {
        "text" | "input_text" => "input_text",
        "image" | "image_url" | "image_file" | "input_image" => "input_image",
        "audio" | "audio_url" | "input_audio" => "input_audio",
        "video" | "video_url" | "input_video" => "input_video",
        "file" | "document" | "input_file" => "input_file",
        _ => return None,
    })
}

fn output_type_alias(part_type: &str) -> Option<&'static str> {
    Some(match part_type {
        "text" | "output_text" => "output_text",
        "image" | "image_url" | "output_image" => "output_image",
        "audio" | "audio_url" | "output_audio" => "output_audio",
        "video" | "video_url" | "output_video" => "output_video",
        _ => return None,
    })
}

fn tool_type_alias(part_type: &str) -> Option<&'static str> {
    Some(match part_type {
        "text" | "tool_result" | "input_text" | "output_text" => "tool_result",
        _ => return None,
    })
}

/// Map a part type through the role's alias table.
///
/// Unknown types already carrying the role's prefix pass through lowercased;
/// anything else yields `None` so the caller can apply the role default.
fn normalize_type_by_role(role: ChatRole, part_type: &str) -> Option<String> {
    let lowered = part_type.to_ascii_lowercase();
    let (alias, prefix) = match role {
        ChatRole::Assistant => (output_type_alias(&lowered), "output_"),
        ChatRole::Tool => (tool_type_alias(&lowered), "tool_"),
        ChatRole::System | ChatRole::Developer | ChatRole::User => {
            (input_type_alias(&lowered), "input_")
        }
    };
    match alias {
        Some(alias) => Some(alias.to_string()),
        None if lowered.starts_with(prefix) => Some(lowered),
        None => None,
    }
}

fn text_part(role: ChatRole, text: String) -> Value {
    let mut part = Map::with_capacity(2);
    part.insert("type".into(), Value::String(default_part_type(role).into()));
    part.insert("text".into(), Value::String(text));
    Value::Object(part)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalize one message's `content` into a list of flat-item content parts.
///
/// The input is never mutated; every returned part is a fresh copy.
#[must_use]
pub fn normalize_message_content(role: ChatRole, content: Option<&Value>) -> Vec<Value> {
    match content {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(text)) => vec![text_part(role, text.clone())],
        Some(part @ Value::Object(_)) => vec![convert_content_part(role, part)],
        Some(Value::Array(parts)) => parts
            .iter()
            .map(|part| convert_content_part(role, part))
            .collect(),
        Some(other) => vec![text_part(role, scalar_text(other))],
    }
}

/// Convert a single content part for the given role.
#[must_use]
pub fn convert_content_part(role: ChatRole, part: &Value) -> Value {
    let Value::Object(source) = part else {
        return text_part(role, scalar_text(part));
    };

    let mut new_part: Map<String, Value> = source
        .iter()
        .filter(|(key, _)| !CONTENT_KEYS_TO_DROP.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let part_type = match new_part.get("type") {
        Some(Value::String(raw)) => {
            normalize_type_by_role(role, raw).unwrap_or_else(|| raw.clone())
        }
        Some(other) => scalar_text(other),
        None => default_part_type(role).to_string(),
    };
    new_part.insert("type".into(), Value::String(part_type.clone()));

    match part_type.as_str() {
        "input_text" | "output_text" | "tool_result" => {
            if !new_part.contains_key("text") {
                let text = ["content", "value", "message"]
                    .iter()
                    .find_map(|key| new_part.remove(*key))
                    .unwrap_or_else(|| Value::String(String::new()));
                new_part.insert("text".into(), text);
            }
        }
        "input_image" => {
            if let Some(payload) = new_part.get_mut("image_url") {
                let unwrapped = match payload {
                    Value::Object(wrapper) if wrapper.len() == 1 => wrapper.get("url").cloned(),
                    _ => None,
                };
                if let Some(url) = unwrapped {
                    *payload = url;
                }
            } else if let Some(image) = new_part.remove("image") {
                new_part.insert("image_url".into(), image);
            }
        }
        "input_audio" => rename_if_absent(&mut new_part, "audio", "audio_url"),
        "input_video" => rename_if_absent(&mut new_part, "video", "video_url"),
        "input_file" => rename_if_absent(&mut new_part, "file", "file_id"),
        _ => {}
    }

    Value::Object(new_part)
}

fn rename_if_absent(part: &mut Map<String, Value>, from: &str, to: &str) {
    if part.contains_key(to) {
        return;
    }
    if let Some(value) = part.remove(from) {
        part.insert(to.into(), value);
    }
}

/// Flatten nested content into a single plain string.
///
/// Lists concatenate the first of `text`/`input_text`/`output_text` found in
/// each part, recursing into nested `content` otherwise. Non-text parts such
/// as images contribute nothing.
#[must_use]
pub fn flatten_text(content: &Value) -> String {
    let mut out = String::new();
    flatten_text_into(content, &mut out);
    out
}

fn flatten_text_into(content: &Value, out: &mut String) {
    match content {
        Value::Null => {}
        Value::String(text) => out.push_str(text),
        Value::Array(parts) => {
            for part in parts {
                match part {
                    Value::String(text) => out.push_str(text),
                    Value::Object(obj) => {
                        let leaf = ["text", "input_text", "output_text"]
                            .iter()
                            .find_map(|key| obj.get(*key).and_then(Value::as_str));
                        if let Some(text) = leaf {
                            out.push_str(text);
                        } else if let Some(nested) = obj.get("content") {
                            flatten_text_into(nested, out);
                        }
                    }
                    _ => {}
                }
            }
        }
        Value::Object(obj) => {
            if let Some(nested) = obj.get("content") {
                flatten_text_into(nested, out);
            }
        }
        other => out.push_str(&other.to_string()),
    }
}
