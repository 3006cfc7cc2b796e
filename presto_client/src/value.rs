//! Conversion of raw JSON cells into the closed set of driver values.
//!
//! Complex types (map/array/row) intentionally degrade to canonical JSON
//! strings so the public contract stays within a small set of scalar kinds.
//! Both wire dialects are accepted for them: Presto sends the structure,
//! Trino may send a pre-encoded JSON string.

use crate::error::{Error, Result};
use crate::typesig::Column;

/// A single decoded cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Column {
    /// Decode one raw cell of this column.
    pub fn decode_value(&self, raw: &serde_json::Value) -> Result<Value> {
        decode(self.root_type(), raw)
    }
}

pub(crate) fn decode(root: &str, raw: &serde_json::Value) -> Result<Value> {
    match root {
        "boolean" => match raw {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            other => Err(type_error(root, other)),
        },
        "tinyint" | "smallint" | "integer" | "bigint" => match raw {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int64)
                .ok_or_else(|| type_error(root, raw)),
            other => Err(type_error(root, other)),
        },
        "real" | "double" => decode_float(root, raw),
        "json" | "char" | "varchar" | "varbinary" | "date" | "time" | "time with time zone"
        | "timestamp" | "timestamp with time zone" | "interval year to month"
        | "interval day to second" | "decimal" | "ipaddress" | "ipprefix" | "uuid"
        | "unknown" => match raw {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            other => Err(type_error(root, other)),
        },
        "map" => decode_complex(root, raw, serde_json::Value::is_object),
        "array" | "row" => decode_complex(root, raw, serde_json::Value::is_array),
        // Opaque pass-through for raw types we do not recognize.
        _ => match raw {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            other => Ok(Value::String(other.to_string())),
        },
    }
}

/// Floats arrive as JSON numbers, as the IEEE sentinel strings `"NaN"`,
/// `"Infinity"` and `"-Infinity"`, or (Trino) as arbitrary numeric strings.
fn decode_float(root: &str, raw: &serde_json::Value) -> Result<Value> {
    match raw {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(Value::Float64)
            .ok_or_else(|| type_error(root, raw)),
        serde_json::Value::String(s) => match s.as_str() {
            "NaN" => Ok(Value::Float64(f64::NAN)),
            "Infinity" => Ok(Value::Float64(f64::INFINITY)),
            "-Infinity" => Ok(Value::Float64(f64::NEG_INFINITY)),
            other => other
                .parse::<f64>()
                .map(Value::Float64)
                .map_err(|_| type_error(root, raw)),
        },
        other => Err(type_error(root, other)),
    }
}

fn decode_complex(
    root: &str,
    raw: &serde_json::Value,
    shape: fn(&serde_json::Value) -> bool,
) -> Result<Value> {
    match raw {
        // Complex nulls keep the cursor's string contract.
        serde_json::Value::Null => Ok(Value::String(String::new())),
        serde_json::Value::String(s) => {
            let parsed: serde_json::Value = serde_json::from_str(s)
                .map_err(|e| Error::decode(format!("{root} cell is not valid JSON: {e}")))?;
            if !shape(&parsed) {
                return Err(type_error(root, raw));
            }
            Ok(Value::String(s.clone()))
        }
        other if shape(other) => Ok(Value::String(other.to_string())),
        other => Err(type_error(root, other)),
    }
}

fn type_error(root: &str, raw: &serde_json::Value) -> Error {
    Error::decode(format!("unexpected value for {root} column: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars() {
        assert_eq!(decode("boolean", &json!(true)).unwrap(), Value::Bool(true));
        assert_eq!(decode("bigint", &json!(42)).unwrap(), Value::Int64(42));
        assert_eq!(
            decode("varchar", &json!("abc")).unwrap(),
            Value::String("abc".to_owned())
        );
        assert_eq!(decode("integer", &json!(null)).unwrap(), Value::Null);
    }

    #[test]
    fn float_sentinels() {
        let nan = decode("double", &json!("NaN")).unwrap();
        assert!(nan.as_f64().unwrap().is_nan());
        assert_eq!(
            decode("double", &json!("Infinity")).unwrap(),
            Value::Float64(f64::INFINITY)
        );
        assert_eq!(
            decode("double", &json!("-Infinity")).unwrap(),
            Value::Float64(f64::NEG_INFINITY)
        );
        // Any other numeric string parses as a plain float.
        assert_eq!(
            decode("real", &json!("1.5")).unwrap(),
            Value::Float64(1.5)
        );
        assert_eq!(
            decode("double", &json!(2.25)).unwrap(),
            Value::Float64(2.25)
        );
    }

    #[test]
    fn map_dialect_tolerance() {
        // Structure and pre-encoded string decode to the same canonical text.
        let from_object = decode("map", &json!({"a": 1})).unwrap();
        let from_string = decode("map", &json!(r#"{"a":1}"#)).unwrap();
        assert_eq!(from_object, Value::String(r#"{"a":1}"#.to_owned()));
        assert_eq!(from_object, from_string);
    }

    #[test]
    fn map_string_must_parse_as_object() {
        assert!(decode("map", &json!("[1, 2]")).is_err());
        assert!(decode("map", &json!("{not json")).is_err());
    }

    #[test]
    fn array_and_row_as_json_text() {
        assert_eq!(
            decode("array", &json!([1, 2, 3])).unwrap(),
            Value::String("[1,2,3]".to_owned())
        );
        assert_eq!(
            decode("row", &json!(["a", 1])).unwrap(),
            Value::String(r#"["a",1]"#.to_owned())
        );
    }

    #[test]
    fn complex_null_is_empty_string() {
        assert_eq!(
            decode("map", &json!(null)).unwrap(),
            Value::String(String::new())
        );
        assert_eq!(
            decode("array", &json!(null)).unwrap(),
            Value::String(String::new())
        );
    }

    #[test]
    fn opaque_pass_through() {
        assert_eq!(
            decode("geometry", &json!("POINT (1 2)")).unwrap(),
            Value::String("POINT (1 2)".to_owned())
        );
        assert_eq!(decode("geometry", &json!(null)).unwrap(), Value::Null);
    }
}
