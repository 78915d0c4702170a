//! Tool and function declaration conversion into the flat-item grammar.

use serde_json::{Map, Value};

use crate::error::CanonicalError;

const FUNCTION_METADATA_KEYS: &[&str] = &["description", "parameters", "strict"];

fn non_empty_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Accept a single mapping or a list of mappings; anything else is a
/// contract violation.
fn declaration_entries<'a>(
    value: &'a Value,
    what: &str,
) -> Result<Vec<&'a Map<String, Value>>, CanonicalError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(obj) => Ok(vec![obj]),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                item.as_object().ok_or_else(|| {
                    CanonicalError::invalid(format!("{what} definition at index {idx} must be a mapping"))
                })
            })
            .collect(),
        _ => Err(CanonicalError::invalid(format!("{what}s must be a list or mapping"))),
    }
}

/// Convert a `tools` declaration list.
///
/// # Errors
///
/// Returns [`CanonicalError::InvalidRequest`] when `tools` is neither a list
/// nor a mapping, or when a list entry is not a mapping.
pub fn convert_tools(tools: &Value) -> Result<Vec<Value>, CanonicalError> {
    let mut converted = Vec::new();
    for tool in declaration_entries(tools, "tool")? {
        let is_function = tool.get("type").and_then(Value::as_str) == Some("function");
        let nested = tool.get("function");

        if is_function && nested.is_none() {
            if non_empty_str(tool, "name").is_some() {
                converted.push(Value::Object(tool.clone()));
            }
            continue;
        }

        if is_function || nested.is_some() {
            let empty = Map::new();
            let payload = nested.and_then(Value::as_object).unwrap_or(&empty);
            let Some(name) = non_empty_str(payload, "name").or_else(|| non_empty_str(tool, "name"))
            else {
                tracing::debug!("dropping nested tool declaration without a name");
                continue;
            };

            let mut flat: Map<String, Value> = tool
                .iter()
                .filter(|(key, _)| key.as_str() != "function")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            flat.insert("type".into(), Value::String("function".into()));
            flat.insert("name".into(), Value::String(name.to_string()));
            for key in FUNCTION_METADATA_KEYS {
                if let Some(value) = payload.get(*key) {
                    flat.entry(*key).or_insert_with(|| value.clone());
                }
            }
            converted.push(Value::Object(flat));
            continue;
        }

        converted.push(Value::Object(tool.clone()));
    }
    Ok(converted)
}

/// Convert a legacy `functions` declaration list into flat tool entries.
///
/// # Errors
///
/// Same contract as [`convert_tools`].
pub fn convert_functions(functions: &Value) -> Result<Vec<Value>, CanonicalError> {
    let mut converted = Vec::new();
    for function in declaration_entries(functions, "function")? {
        let Some(name) = non_empty_str(function, "name") else {
            continue;
        };
        let mut tool = Map::new();
        tool.insert("type".into(), Value::String("function".into()));
        tool.insert("name".into(), Value::String(name.to_string()));
        for key in FUNCTION_METADATA_KEYS {
            if let Some(value) = function.get(*key) {
                tool.insert((*key).to_string(), value.clone());
            }
        }
        converted.push(Value::Object(tool));
    }
    Ok(converted)
}

fn named_choice(source: &Map<String, Value>) -> Option<Value> {
    let name = non_empty_str(source, "name")?;
    let mut choice = Map::new();
    choice.insert("type".into(), Value::String("function".into()));
    choice.insert("name".into(), Value::String(name.to_string()));
    for key in ["arguments", "output"] {
        if let Some(value) = source.get(key) {
            choice.insert(key.into(), value.clone());
        }
    }
    Some(Value::Object(choice))
}

/// Convert a `tool_choice` directive. `None` means the parameter should be
/// removed from the outgoing request.
#[must_use]
pub fn convert_tool_choice(tool_choice: &Value) -> Option<Value> {
    match tool_choice {
        Value::String(_) => Some(tool_choice.clone()),
        Value::Object(obj) => {
            if let Some(Value::Object(function)) = obj.get("function") {
                return named_choice(function);
            }
            if obj.get("type").and_then(Value::as_str) == Some("function") {
                return named_choice(obj);
            }
            Some(tool_choice.clone())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_tool_is_flattened() {
        let tools = json!([{
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "Look up weather",
                "parameters": {"type": "object"}
            }
        }]);
        let converted = convert_tools(&tools).unwrap();
        assert_eq!(
            converted,
            vec![json!({
                "type": "function",
                "name": "get_weather",
                "description": "Look up weather",
                "parameters": {"type": "object"}
            })]
        );
    }

    #[test]
    fn test_top_level_metadata_wins() {
        let tools = json!({
            "function": {"name": "f", "description": "inner"},
            "description": "outer"
        });
        let converted = convert_tools(&tools).unwrap();
        assert_eq!(converted[0]["description"], "outer");
        assert_eq!(converted[0]["type"], "function");
    }

    #[test]
    fn test_flat_and_unnamed_tools() {
        let tools = json!([
            {"type": "function", "name": "ok"},
            {"type": "function", "name": ""},
            {"type": "function", "function": {"description": "no name"}},
            {"type": "web_search"}
        ]);
        let converted = convert_tools(&tools).unwrap();
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0]["name"], "ok");
        assert_eq!(converted[1], json!({"type": "web_search"}));
    }

    #[test]
    fn test_invalid_tool_shapes() {
        let err = convert_tools(&json!("nope")).unwrap_err();
        assert!(matches!(err, CanonicalError::InvalidRequest(_)));
        let err = convert_tools(&json!([1])).unwrap_err();
        assert!(err.to_string().contains("index 0"));
        assert!(convert_functions(&json!(3)).is_err());
    }

    #[test]
    fn test_legacy_functions() {
        let functions = json!([
            {"name": "lookup", "parameters": {"type": "object"}, "extra": true},
            {"description": "nameless"}
        ]);
        let converted = convert_functions(&functions).unwrap();
        assert_eq!(
            converted,
            vec![json!({"type": "function", "name": "lookup", "parameters": {"type": "object"}})]
        );
    }

    #[test]
    fn test_tool_choice() {
        assert_eq!(convert_tool_choice(&json!("auto")), Some(json!("auto")));
        assert_eq!(
            convert_tool_choice(&json!({"type": "function", "function": {"name": "f"}})),
            Some(json!({"type": "function", "name": "f"}))
        );
        assert_eq!(
            convert_tool_choice(&json!({"type": "function", "name": "g", "arguments": "{}"})),
            Some(json!({"type": "function", "name": "g", "arguments": "{}"}))
        );
        assert_eq!(convert_tool_choice(&json!({"function": {"name": ""}})), None);
        assert_eq!(
            convert_tool_choice(&json!({"type": "required"})),
            Some(json!({"type": "required"}))
        );
        assert_eq!(convert_tool_choice(&json!(5)), None);
    }
}
