//! JSON values as call arguments and results.
//!
//! `serde_json::Value` stands in for a host engine's native term tree:
//! numbers, strings, arrays and objects map onto the descriptor kinds, and
//! object keys surface as string values.

use super::value::{Integer, StructuredValue, Value};
use serde_json::{Map, Number, Value as Json};
use std::borrow::Cow;

impl StructuredValue for Json {
    fn kind(&self) -> &'static str {
        match self {
            Json::Null => "null",
            Json::Bool(_) => "boolean",
            Json::Number(_) => "number",
            Json::String(_) => "string",
            Json::Array(_) => "array",
            Json::Object(_) => "object",
        }
    }

    fn as_integer(&self) -> Option<Integer> {
        let Json::Number(n) = self else {
            return None;
        };
        Some(number_as_integer(n))
    }

    fn as_str(&self) -> Option<&str> {
        Json::as_str(self)
    }

    fn as_sequence(&self) -> Option<Vec<&Self>> {
        Json::as_array(self).map(|items| items.iter().collect())
    }

    fn as_mapping(&self) -> Option<Vec<(Cow<'_, Self>, &Self)>> {
        Json::as_object(self).map(|entries| {
            entries
                .iter()
                .map(|(k, v)| (Cow::Owned(Json::String(k.clone())), v))
                .collect()
        })
    }
}

/// Integral floats are accepted; JSON does not distinguish `3` from `3.0`.
fn number_as_integer(n: &Number) -> Integer {
    if let Some(v) = n.as_i64() {
        return Integer::Exact(v);
    }
    if n.is_u64() {
        return Integer::TooLarge(n.to_string());
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 => {
            if f >= i64::MIN as f64 && f < i64::MAX as f64 {
                Integer::Exact(f as i64)
            } else {
                Integer::TooLarge(n.to_string())
            }
        }
        _ => Integer::Fractional,
    }
}

impl From<Value> for Json {
    fn from(value: Value) -> Self {
        match value {
            Value::Int(v) => Json::Number(v.into()),
            Value::String(s) => Json::String(s),
            Value::Array(items) => Json::Array(items.into_iter().map(Json::from).collect()),
            Value::Object(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (k, v) in entries {
                    map.insert(object_key(k), Json::from(v));
                }
                Json::Object(map)
            }
        }
    }
}

/// JSON keys are strings; other key values are written as their JSON text.
fn object_key(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => Json::from(other).to_string(),
    }
}
