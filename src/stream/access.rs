use serde_json::{Map, Value};

use crate::protocol::openai_responses::ResponsesStreamEvent;

/// Uniform field access over the upstream event shapes the normalizer accepts.
///
/// Implementors only need [`EventFields::value_field`]; typed shapes whose
/// fields are not stored as JSON override the scalar accessors too.
pub trait EventFields {
    fn value_field(&self, key: &str) -> Option<&Value>;

    fn str_field(&self, key: &str) -> Option<&str> {
        self.value_field(key).and_then(Value::as_str)
    }

    fn int_field(&self, key: &str) -> Option<u64> {
        self.value_field(key).and_then(Value::as_u64)
    }

    /// Owned copy of a field, for passthrough into diagnostic metadata.
    fn owned_field(&self, key: &str) -> Option<Value> {
        self.value_field(key).cloned()
    }

    /// The whole event as JSON, for traces of what the upstream sent.
    fn to_raw(&self) -> Value;
}

impl EventFields for Map<String, Value> {
    #[inline]
    fn value_field(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }

    fn to_raw(&self) -> Value {
        Value::Object(self.clone())
    }
}

impl EventFields for Value {
    #[inline]
    fn value_field(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|obj| obj.get(key))
    }

    fn to_raw(&self) -> Value {
        self.clone()
    }
}

impl<T: EventFields + ?Sized> EventFields for &T {
    #[inline]
    fn value_field(&self, key: &str) -> Option<&Value> {
        (**self).value_field(key)
    }

    #[inline]
    fn str_field(&self, key: &str) -> Option<&str> {
        (**self).str_field(key)
    }

    #[inline]
    fn int_field(&self, key: &str) -> Option<u64> {
        (**self).int_field(key)
    }

    #[inline]
    fn owned_field(&self, key: &str) -> Option<Value> {
        (**self).owned_field(key)
    }

    fn to_raw(&self) -> Value {
        (**self).to_raw()
    }
}

impl EventFields for ResponsesStreamEvent {
    fn value_field(&self, key: &str) -> Option<&Value> {
        match key {
            "delta" => self.delta.as_ref(),
            "arguments" => self.arguments.as_ref(),
            "item" => self.item.as_ref(),
            "response" => self.response.as_ref(),
            "type" | "event" | "item_id" | "output_index" | "index" => None,
            _ => self.extra.get(key),
        }
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        match key {
            "type" => self.kind.as_deref(),
            "event" => self.event.as_deref(),
            "item_id" => self.item_id.as_deref(),
            _ => self.value_field(key).and_then(Value::as_str),
        }
    }

    fn int_field(&self, key: &str) -> Option<u64> {
        match key {
            "output_index" => self.output_index,
            "index" => self.index,
            _ => self.value_field(key).and_then(Value::as_u64),
        }
    }

    fn owned_field(&self, key: &str) -> Option<Value> {
        match key {
            "type" | "event" | "item_id" => self.str_field(key).map(|s| Value::String(s.to_string())),
            "output_index" | "index" => self.int_field(key).map(Value::from),
            _ => self.value_field(key).cloned(),
        }
    }

    fn to_raw(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
