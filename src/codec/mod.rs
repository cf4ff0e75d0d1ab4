//! Type-directed encoder and decoder.
//!
//! The descriptor drives both directions: the encoder walks the source value
//! depth-first and writes each node in the form its descriptor names, and
//! the decoder reads the same sequence back in the same order. Nothing on
//! the wire says what type follows, so the descriptor is the schema.
//!
//! Object entries are written in whatever order the source value enumerates
//! them; the decoder relies only on the entry count.

pub mod encoding;
pub mod json;
pub mod reader;
pub mod value;

pub use reader::Reader;
pub use value::{Integer, StructuredValue, Value};

use crate::error::{DecodeError, EncodeError, EncodeErrorKind, PathSegment};
use crate::schema::TypeDescriptor;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Appends the encoding of `value` under `descriptor` to `buf`.
///
/// On failure `buf` may hold a partial encoding; callers discard it.
pub fn encode<V: StructuredValue>(
    value: &V,
    descriptor: &TypeDescriptor,
    buf: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    match descriptor {
        TypeDescriptor::Int => {
            let int = match value.as_integer() {
                Some(Integer::Exact(v)) => i32::try_from(v).map_err(|_| {
                    mismatch(value, descriptor, EncodeErrorKind::IntegerOverflow { value: v.to_string() })
                })?,
                Some(Integer::Fractional) => {
                    return Err(mismatch(value, descriptor, EncodeErrorKind::NotAnInteger))
                }
                Some(Integer::TooLarge(v)) => {
                    return Err(mismatch(value, descriptor, EncodeErrorKind::IntegerOverflow { value: v }))
                }
                None => return Err(kind_mismatch(value, descriptor)),
            };
            encoding::write_int(buf, int);
        }
        TypeDescriptor::String => {
            let s = value.as_str().ok_or_else(|| kind_mismatch(value, descriptor))?;
            check_len(value, descriptor, s.len())?;
            encoding::write_str(buf, s);
        }
        TypeDescriptor::Array(elem) => {
            let items = value.as_sequence().ok_or_else(|| kind_mismatch(value, descriptor))?;
            let len = check_len(value, descriptor, items.len())?;
            encoding::write_array_len(buf, len);
            for (i, item) in items.into_iter().enumerate() {
                encode(item, elem, buf).map_err(|e| e.within(PathSegment::Index(i)))?;
            }
        }
        TypeDescriptor::Object(key_type, value_type) => {
            let entries = value.as_mapping().ok_or_else(|| kind_mismatch(value, descriptor))?;
            let len = check_len(value, descriptor, entries.len())?;
            encoding::write_map_len(buf, len);
            for (i, (key, entry)) in entries.into_iter().enumerate() {
                let key: &V = &key;
                encode(key, key_type, buf).map_err(|e| e.within(PathSegment::Key(i)))?;
                encode(entry, value_type, buf)
                    .map_err(|e| e.within(PathSegment::Entry(render_key(key, i))))?;
            }
        }
    }
    Ok(())
}

/// Encodes a single value into a fresh buffer.
pub fn encode_to_vec<V: StructuredValue>(value: &V, descriptor: &TypeDescriptor) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    encode(value, descriptor, &mut buf)?;
    Ok(buf)
}

/// Encodes positional arguments back to back, one per parameter.
///
/// Arguments are not individually framed; the receiver decodes them in the
/// same order from the same parameter list. Extra arguments beyond the
/// declared parameters are ignored.
pub fn encode_args<V: StructuredValue>(args: &[V], params: &[TypeDescriptor]) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    for (i, (arg, param)) in args.iter().zip(params).enumerate() {
        encode(arg, param, &mut buf).map_err(|e| e.within(PathSegment::Argument(i)))?;
    }
    Ok(buf)
}

fn kind_mismatch<V: StructuredValue>(value: &V, descriptor: &TypeDescriptor) -> EncodeError {
    let found = value.kind().to_string();
    mismatch(value, descriptor, EncodeErrorKind::KindMismatch { found })
}

fn mismatch<V: StructuredValue>(value: &V, descriptor: &TypeDescriptor, kind: EncodeErrorKind) -> EncodeError {
    EncodeError::new(descriptor, kind, value.location())
}

fn check_len<V: StructuredValue>(value: &V, descriptor: &TypeDescriptor, len: usize) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| mismatch(value, descriptor, EncodeErrorKind::LengthOverflow { len }))
}

fn render_key<V: StructuredValue>(key: &V, index: usize) -> String {
    if let Some(s) = key.as_str() {
        return format!("{s:?}");
    }
    match key.as_integer() {
        Some(Integer::Exact(v)) => v.to_string(),
        _ => format!("#{index}"),
    }
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Reads one value under `descriptor` from the reader's current position.
pub fn decode_from(reader: &mut Reader<'_>, descriptor: &TypeDescriptor) -> Result<Value, DecodeError> {
    match descriptor {
        TypeDescriptor::Int => Ok(Value::Int(reader.read_int()?)),
        TypeDescriptor::String => Ok(Value::String(reader.read_str()?)),
        TypeDescriptor::Array(elem) => {
            let count = reader.read_array_len()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(decode_from(reader, elem)?);
            }
            Ok(Value::Array(items))
        }
        TypeDescriptor::Object(key_type, value_type) => {
            let count = reader.read_map_len()?;
            let mut entries = BTreeMap::new();
            for _ in 0..count {
                let at = reader.pos();
                let key = decode_from(reader, key_type)?;
                let value = decode_from(reader, value_type)?;
                if entries.insert(key, value).is_some() {
                    return Err(DecodeError::DuplicateKey { at });
                }
            }
            Ok(Value::Object(entries))
        }
    }
}

/// Decodes exactly one value; trailing bytes are an error.
pub fn decode(bytes: &[u8], descriptor: &TypeDescriptor) -> Result<Value, DecodeError> {
    let mut reader = Reader::new(bytes);
    let value = decode_from(&mut reader, descriptor)?;
    if !reader.is_empty() {
        return Err(DecodeError::TrailingBytes {
            at: reader.pos(),
            count: reader.remaining(),
        });
    }
    Ok(value)
}

/// Decodes a concatenated argument buffer, one value per parameter.
///
/// This is the guest-side mirror of [`encode_args`].
pub fn decode_args(bytes: &[u8], params: &[TypeDescriptor]) -> Result<Vec<Value>, DecodeError> {
    let mut reader = Reader::new(bytes);
    let mut values = Vec::with_capacity(params.len());
    for param in params {
        values.push(decode_from(&mut reader, param)?);
    }
    if !reader.is_empty() {
        return Err(DecodeError::TrailingBytes {
            at: reader.pos(),
            count: reader.remaining(),
        });
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn int() -> TypeDescriptor {
        TypeDescriptor::Int
    }

    fn string() -> TypeDescriptor {
        TypeDescriptor::String
    }

    #[test]
    fn scenario_string() {
        let bytes = encode_to_vec(&Value::from("foo"), &string()).unwrap();
        assert_eq!(bytes, vec![0xa3, b'f', b'o', b'o']);
        assert_eq!(decode(&bytes, &string()).unwrap(), Value::from("foo"));
    }

    #[test]
    fn scenario_int_array_keeps_order() {
        let descriptor = TypeDescriptor::array(int());
        let bytes = encode_to_vec(&Value::array([1, 2, 3]), &descriptor).unwrap();
        assert_eq!(bytes, vec![0x93, 0x01, 0x02, 0x03]);
        assert_eq!(decode(&bytes, &descriptor).unwrap(), Value::array([1, 2, 3]));

        let bytes = encode_to_vec(&Value::array([3, 1, 2]), &descriptor).unwrap();
        assert_eq!(decode(&bytes, &descriptor).unwrap(), Value::array([3, 1, 2]));
    }

    #[test]
    fn scenario_object_of_string_arrays() {
        let descriptor = TypeDescriptor::object(string(), TypeDescriptor::array(string()));
        let value = Value::object([("a", Value::array(["x", "y"]))]);
        let bytes = encode_to_vec(&value, &descriptor).unwrap();
        assert_eq!(
            bytes,
            vec![0x81, 0xa1, b'a', 0x92, 0xa1, b'x', 0xa1, b'y']
        );
        assert_eq!(decode(&bytes, &descriptor).unwrap(), value);
    }

    #[test]
    fn object_decode_is_order_independent() {
        let descriptor = TypeDescriptor::object(string(), int());
        // {"b": 2, "a": 1} written in reverse key order
        let bytes = vec![0x82, 0xa1, b'b', 0x02, 0xa1, b'a', 0x01];
        assert_eq!(
            decode(&bytes, &descriptor).unwrap(),
            Value::object([("a", 1), ("b", 2)])
        );
    }

    #[test]
    fn duplicate_keys_rejected() {
        let descriptor = TypeDescriptor::object(string(), int());
        let bytes = vec![0x82, 0xa1, b'a', 0x01, 0xa1, b'a', 0x02];
        assert_eq!(
            decode(&bytes, &descriptor).unwrap_err(),
            DecodeError::DuplicateKey { at: 4 }
        );
    }

    #[test]
    fn empty_containers_are_disambiguated_by_descriptor() {
        let array = TypeDescriptor::array(int());
        let object = TypeDescriptor::object(string(), int());
        assert_eq!(encode_to_vec(&Value::Array(vec![]), &array).unwrap(), vec![0x90]);
        assert_eq!(encode_to_vec(&Value::Object(BTreeMap::new()), &object).unwrap(), vec![0x80]);
        assert!(decode(&[0x90], &object).is_err());
        assert!(decode(&[0x80], &array).is_err());
    }

    #[test]
    fn trailing_bytes_rejected() {
        assert_eq!(
            decode(&[0x01, 0x02], &int()).unwrap_err(),
            DecodeError::TrailingBytes { at: 1, count: 1 }
        );
    }

    #[test]
    fn encode_json_values() {
        let descriptor = TypeDescriptor::object(string(), TypeDescriptor::array(int()));
        let bytes = encode_to_vec(&json!({"k": [1, -1, 300]}), &descriptor).unwrap();
        assert_eq!(
            decode(&bytes, &descriptor).unwrap(),
            Value::object([("k", Value::array([1, -1, 300]))])
        );
    }

    #[test]
    fn encode_kind_mismatch_reports_path() {
        let descriptor = TypeDescriptor::array(TypeDescriptor::object(string(), int()));
        let err = encode_to_vec(&json!([{"a": 1}, {"b": "two"}]), &descriptor).unwrap_err();
        assert_eq!(err.descriptor, int());
        assert_eq!(
            err.kind,
            EncodeErrorKind::KindMismatch {
                found: "string".to_string()
            }
        );
        assert_eq!(err.path_string(), r#"[1]{"b"}"#);
    }

    #[test]
    fn encode_key_mismatch() {
        let descriptor = TypeDescriptor::object(int(), int());
        let err = encode_to_vec(&json!({"a": 1}), &descriptor).unwrap_err();
        assert_eq!(err.path(), &[PathSegment::Key(0)]);
    }

    #[test]
    fn encode_integer_errors() {
        let err = encode_to_vec(&json!(1.5), &int()).unwrap_err();
        assert_eq!(err.kind, EncodeErrorKind::NotAnInteger);

        let err = encode_to_vec(&json!(2_147_483_648i64), &int()).unwrap_err();
        assert_eq!(
            err.kind,
            EncodeErrorKind::IntegerOverflow {
                value: "2147483648".to_string()
            }
        );

        let err = encode_to_vec(&json!("12"), &int()).unwrap_err();
        assert_eq!(
            err.kind,
            EncodeErrorKind::KindMismatch {
                found: "string".to_string()
            }
        );
    }

    #[test]
    fn encode_reports_value_location() {
        #[derive(Clone)]
        struct Located(&'static str);

        impl StructuredValue for Located {
            fn kind(&self) -> &'static str {
                "string"
            }
            fn location(&self) -> Option<String> {
                Some("policy.rego:12".to_string())
            }
            fn as_integer(&self) -> Option<Integer> {
                None
            }
            fn as_str(&self) -> Option<&str> {
                Some(self.0)
            }
            fn as_sequence(&self) -> Option<Vec<&Self>> {
                None
            }
            fn as_mapping(&self) -> Option<Vec<(std::borrow::Cow<'_, Self>, &Self)>> {
                None
            }
        }

        let err = encode_to_vec(&Located("x"), &int()).unwrap_err();
        assert_eq!(err.location.as_deref(), Some("policy.rego:12"));
        assert!(err.to_string().ends_with("(policy.rego:12)"));
        assert_eq!(encode_to_vec(&Located("x"), &string()).unwrap(), vec![0xa1, b'x']);
    }

    #[test]
    fn args_are_concatenated_in_order() {
        let params = vec![int(), string()];
        let bytes = encode_args(&[json!(1), json!("a"), json!("ignored")], &params).unwrap();
        assert_eq!(bytes, vec![0x01, 0xa1, b'a']);
        assert_eq!(
            decode_args(&bytes, &params).unwrap(),
            vec![Value::Int(1), Value::from("a")]
        );
    }

    #[test]
    fn arg_errors_name_the_argument() {
        let err = encode_args(&[json!(1), json!(2)], &[int(), string()]).unwrap_err();
        assert_eq!(err.path_string(), "args[1]");
    }

    #[test]
    fn nested_decode_failure_propagates() {
        let descriptor = TypeDescriptor::array(TypeDescriptor::array(int()));
        // Outer array of 1, inner array claims 2 elements, only 1 present.
        let bytes = vec![0x91, 0x92, 0x01];
        assert!(matches!(
            decode(&bytes, &descriptor),
            Err(DecodeError::CountOverflow { at: 1, count: 2, .. })
        ));
    }
}
