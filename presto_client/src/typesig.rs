//! Decoder for the server's recursive `typeSignature` JSON.
//!
//! Presto and Trino tag type arguments differently (`TYPE_SIGNATURE` vs
//! `TYPE`, and so on); the pairs collapse onto three logical kinds. Each
//! argument's `value` is kept raw by serde and re-parsed according to its
//! `kind`, depth first: a parent is decoded only once all of its
//! type-signature arguments are.

use serde::Deserialize;

use crate::error::{Error, Result};

/// One column as the coordinator describes it, undecoded.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub type_signature: Option<RawTypeSignature>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawTypeSignature {
    pub raw_type: String,
    #[serde(default)]
    pub arguments: Vec<RawTypeArgument>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawTypeArgument {
    pub kind: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Fully decoded type signature tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeSignature {
    pub raw_type: String,
    pub arguments: Vec<TypeArgument>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeArgument {
    Type(TypeSignature),
    NamedType(NamedTypeSignature),
    Long(i64),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedTypeSignature {
    #[serde(default)]
    pub field_name: Option<RowFieldName>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RowFieldName {
    pub name: String,
}

impl TypeSignature {
    pub(crate) fn decode(raw: &RawTypeSignature) -> Result<TypeSignature> {
        let mut arguments = Vec::with_capacity(raw.arguments.len());
        for arg in &raw.arguments {
            arguments.push(TypeArgument::decode(arg)?);
        }
        Ok(TypeSignature {
            raw_type: raw.raw_type.clone(),
            arguments,
        })
    }
}

impl TypeArgument {
    fn decode(raw: &RawTypeArgument) -> Result<TypeArgument> {
        match raw.kind.as_str() {
            "TYPE" | "TYPE_SIGNATURE" => {
                let inner: RawTypeSignature = serde_json::from_value(raw.value.clone())
                    .map_err(|e| Error::decode(format!("type signature argument: {e}")))?;
                Ok(TypeArgument::Type(TypeSignature::decode(&inner)?))
            }
            "NAMED_TYPE" | "NAMED_TYPE_SIGNATURE" => {
                let named: NamedTypeSignature = serde_json::from_value(raw.value.clone())
                    .map_err(|e| Error::decode(format!("named type argument: {e}")))?;
                Ok(TypeArgument::NamedType(named))
            }
            "LONG" | "LONG_LITERAL" => {
                let n = raw
                    .value
                    .as_i64()
                    .ok_or_else(|| Error::decode(format!("long argument: {}", raw.value)))?;
                Ok(TypeArgument::Long(n))
            }
            other => Err(Error::decode(format!("unknown type argument kind {other:?}"))),
        }
    }
}

/// The scan kind a decoded cell maps to; all kinds are nullable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    Bool,
    Int32,
    Int64,
    Float64,
    String,
    /// Unrecognized raw type; cells pass through as canonical JSON text.
    Opaque,
}

/// Decoded column metadata, derived once from the first page that carries
/// `columns`.
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    type_name: String,
    parsed_type: Vec<String>,
    scan: ScanKind,
    size: Option<i64>,
    precision: Option<i64>,
    scale: Option<i64>,
}

impl Column {
    pub(crate) fn decode(raw: &RawColumn) -> Result<Column> {
        let signature = match &raw.type_signature {
            Some(sig) => TypeSignature::decode(sig)?,
            // Very old servers omit the signature; fall back to the printed
            // type name up to its argument list.
            None => TypeSignature {
                raw_type: base_type_name(&raw.type_name).to_owned(),
                arguments: Vec::new(),
            },
        };

        let parsed_type = parse_type_path(&signature);
        let (size, precision, scale) = long_literal_metadata(&signature);
        Ok(Column {
            name: raw.name.clone(),
            type_name: raw.type_name.clone(),
            scan: scan_kind(&parsed_type[0]),
            parsed_type,
            size,
            precision,
            scale,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The server's printed type, e.g. `varchar(10)` or `map(varchar, bigint)`.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Raw type names from the root down through linear nesting, e.g.
    /// `["array", "varchar"]`.
    pub fn parsed_type(&self) -> &[String] {
        &self.parsed_type
    }

    pub fn scan_kind(&self) -> ScanKind {
        self.scan
    }

    /// Driver-style database type name: the printed type up to its argument
    /// list, uppercased.
    pub fn database_type_name(&self) -> String {
        base_type_name(&self.type_name).to_uppercase()
    }

    /// Declared length for `char`/`varchar` columns.
    pub fn length(&self) -> Option<i64> {
        self.size
    }

    /// Declared precision and scale for `decimal` columns; precision only for
    /// parametric temporal types.
    pub fn precision_scale(&self) -> (Option<i64>, Option<i64>) {
        (self.precision, self.scale)
    }

    pub(crate) fn root_type(&self) -> &str {
        &self.parsed_type[0]
    }
}

fn base_type_name(type_name: &str) -> &str {
    match type_name.find('(') {
        Some(pos) => &type_name[..pos],
        None => type_name,
    }
}

/// Descend while the node has exactly one argument of type-signature kind,
/// which captures linear nesting like `array(array(varchar))`. `row` and
/// `map` stop at the outer raw type; their display stays the printed name.
fn parse_type_path(signature: &TypeSignature) -> Vec<String> {
    let mut path = vec![signature.raw_type.clone()];
    let mut node = signature;
    while node.arguments.len() == 1 {
        match &node.arguments[0] {
            TypeArgument::Type(inner) => {
                path.push(inner.raw_type.clone());
                node = inner;
            }
            _ => break,
        }
    }
    path
}

fn long_literal_metadata(signature: &TypeSignature) -> (Option<i64>, Option<i64>, Option<i64>) {
    let long_arg = |idx: usize| match signature.arguments.get(idx) {
        Some(TypeArgument::Long(n)) => Some(*n),
        _ => None,
    };
    match signature.raw_type.as_str() {
        "char" | "varchar" => (long_arg(0), None, None),
        "decimal" => (None, long_arg(0), long_arg(1)),
        "time" | "time with time zone" | "timestamp" | "timestamp with time zone" => {
            (None, long_arg(0), None)
        }
        _ => (None, None, None),
    }
}

fn scan_kind(root: &str) -> ScanKind {
    match root {
        "boolean" => ScanKind::Bool,
        "tinyint" | "smallint" | "integer" => ScanKind::Int32,
        "bigint" => ScanKind::Int64,
        "real" | "double" => ScanKind::Float64,
        "json" | "char" | "varchar" | "varbinary" | "date" | "time" | "time with time zone"
        | "timestamp" | "timestamp with time zone" | "interval year to month"
        | "interval day to second" | "decimal" | "ipaddress" | "ipprefix" | "uuid" | "unknown"
        | "map" | "array" | "row" => ScanKind::String,
        _ => ScanKind::Opaque,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(json: serde_json::Value) -> Column {
        let raw: RawColumn = serde_json::from_value(json).unwrap();
        Column::decode(&raw).unwrap()
    }

    #[test]
    fn integer_column() {
        let col = column(serde_json::json!({
            "name": "_col0",
            "type": "integer",
            "typeSignature": {"rawType": "integer", "arguments": []}
        }));
        assert_eq!(col.parsed_type(), ["integer"]);
        assert_eq!(col.scan_kind(), ScanKind::Int32);
        assert_eq!(col.database_type_name(), "INTEGER");
    }

    #[test]
    fn varchar_size_from_long_literal() {
        // Presto dialect.
        let col = column(serde_json::json!({
            "name": "s",
            "type": "varchar(10)",
            "typeSignature": {
                "rawType": "varchar",
                "arguments": [{"kind": "LONG_LITERAL", "value": 10}]
            }
        }));
        assert_eq!(col.length(), Some(10));
        assert_eq!(col.database_type_name(), "VARCHAR");

        // Trino dialect tags the same argument "LONG".
        let col = column(serde_json::json!({
            "name": "s",
            "type": "varchar(10)",
            "typeSignature": {
                "rawType": "varchar",
                "arguments": [{"kind": "LONG", "value": 10}]
            }
        }));
        assert_eq!(col.length(), Some(10));
    }

    #[test]
    fn decimal_precision_and_scale() {
        let col = column(serde_json::json!({
            "name": "d",
            "type": "decimal(38, 2)",
            "typeSignature": {
                "rawType": "decimal",
                "arguments": [
                    {"kind": "LONG_LITERAL", "value": 38},
                    {"kind": "LONG_LITERAL", "value": 2}
                ]
            }
        }));
        assert_eq!(col.precision_scale(), (Some(38), Some(2)));
        assert_eq!(col.scan_kind(), ScanKind::String);
    }

    #[test]
    fn array_path_descends_linear_nesting() {
        let col = column(serde_json::json!({
            "name": "a",
            "type": "array(varchar)",
            "typeSignature": {
                "rawType": "array",
                "arguments": [{
                    "kind": "TYPE_SIGNATURE",
                    "value": {"rawType": "varchar", "arguments": []}
                }]
            }
        }));
        assert_eq!(col.parsed_type(), ["array", "varchar"]);
        assert_eq!(col.scan_kind(), ScanKind::String);
    }

    #[test]
    fn map_path_stops_at_root() {
        let col = column(serde_json::json!({
            "name": "m",
            "type": "map(varchar, integer)",
            "typeSignature": {
                "rawType": "map",
                "arguments": [
                    {"kind": "TYPE", "value": {"rawType": "varchar"}},
                    {"kind": "TYPE", "value": {"rawType": "integer"}}
                ]
            }
        }));
        assert_eq!(col.parsed_type(), ["map"]);
        assert_eq!(col.type_name(), "map(varchar, integer)");
    }

    #[test]
    fn row_named_arguments() {
        let raw: RawTypeSignature = serde_json::from_value(serde_json::json!({
            "rawType": "row",
            "arguments": [{
                "kind": "NAMED_TYPE_SIGNATURE",
                "value": {
                    "fieldName": {"name": "x"},
                    "typeSignature": "varchar"
                }
            }]
        }))
        .unwrap();
        let sig = TypeSignature::decode(&raw).unwrap();
        match &sig.arguments[0] {
            TypeArgument::NamedType(named) => {
                assert_eq!(named.field_name.as_ref().unwrap().name, "x");
            }
            other => panic!("unexpected argument: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_a_decode_error() {
        let raw: RawTypeSignature = serde_json::from_value(serde_json::json!({
            "rawType": "varchar",
            "arguments": [{"kind": "WAT", "value": 0}]
        }))
        .unwrap();
        let err = TypeSignature::decode(&raw).unwrap_err();
        assert!(matches!(err, Error::Decode(_)), "got {err}");
    }
}
