//! Structured values.
//!
//! The codec never depends on a concrete value tree. Anything that can
//! answer the [`StructuredValue`] questions (is this an integer, a string, a
//! sequence, a mapping?) can be encoded. Decoding produces the owned
//! [`Value`] tree, which answers the same questions, so values round-trip
//! without a host engine in the loop.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Result of asking a value for an integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integer {
    /// An integer that fits in an i64.
    Exact(i64),
    /// A number with a fractional part (or not finite).
    Fractional,
    /// An integer beyond the i64 range, rendered for diagnostics.
    TooLarge(String),
}

/// Capability set the codec needs from a source value.
///
/// Every extraction returns `None` when the value is of another kind; the
/// codec turns that into an `EncodeError` naming [`kind`](Self::kind).
pub trait StructuredValue: Clone {
    /// Short kind name used in diagnostics, e.g. `"string"`.
    fn kind(&self) -> &'static str;

    /// Where the value came from (file, line), when the host knows.
    fn location(&self) -> Option<String> {
        None
    }

    /// `None` if the value is not a number.
    fn as_integer(&self) -> Option<Integer>;

    fn as_str(&self) -> Option<&str>;

    fn as_sequence(&self) -> Option<Vec<&Self>>;

    /// Entries of a mapping. Keys may be synthesised (e.g. JSON object keys
    /// surface as string values), hence `Cow`.
    fn as_mapping(&self) -> Option<Vec<(Cow<'_, Self>, &Self)>>;
}

/// Owned value tree produced by decoding.
///
/// Objects are keyed by `Value` and compare as entry sets, independent of
/// the order entries were read in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Int(i32),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<Value, Value>),
}

impl Value {
    /// Build an object from key/value pairs; later duplicates win.
    pub fn object<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Value
    where
        K: Into<Value>,
        V: Into<Value>,
    {
        Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build an array from anything convertible into values.
    pub fn array<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Value {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Object(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<BTreeMap<Value, Value>> for Value {
    fn from(v: BTreeMap<Value, Value>) -> Self {
        Value::Object(v)
    }
}

impl StructuredValue for Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    fn as_integer(&self) -> Option<Integer> {
        match self {
            Value::Int(v) => Some(Integer::Exact(*v as i64)),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn as_sequence(&self) -> Option<Vec<&Self>> {
        match self {
            Value::Array(items) => Some(items.iter().collect()),
            _ => None,
        }
    }

    fn as_mapping(&self) -> Option<Vec<(Cow<'_, Self>, &Self)>> {
        match self {
            Value::Object(entries) => Some(entries.iter().map(|(k, v)| (Cow::Borrowed(k), v)).collect()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_equality_ignores_insertion_order() {
        let a = Value::object([("a", 1), ("b", 2)]);
        let b = Value::object([("b", 2), ("a", 1)]);
        assert_eq!(a, b);
    }

    #[test]
    fn display() {
        let v = Value::object([("k", Value::array(["x", "y"]))]);
        assert_eq!(v.to_string(), r#"{"k": ["x", "y"]}"#);
        assert_eq!(Value::Int(-4).to_string(), "-4");
    }

    #[test]
    fn capability_set() {
        let v = Value::array([1, 2]);
        assert_eq!(v.kind(), "array");
        assert_eq!(v.as_sequence().map(|s| s.len()), Some(2));
        assert!(v.as_str().is_none());
        assert!(v.as_integer().is_none());
        assert!(v.as_mapping().is_none());
        assert_eq!(Value::Int(7).as_integer(), Some(Integer::Exact(7)));
    }
}
