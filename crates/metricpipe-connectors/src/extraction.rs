//! Declarative field extraction from JSON events.
//!
//! An [`ExtractionSpec`] maps output field names to a JSON pointer
//! (RFC 6901) and the scalar type the pointed-to value must have. It is
//! parsed once at startup from a JSON object such as:
//!
//! ```json
//! {
//!   "val":  { "pointer": "/data/value", "type": "int" },
//!   "host": { "pointer": "/meta/host",  "type": "string" }
//! }
//! ```
//!
//! ## Coercion rules
//!
//! | Type     | Accepts                                   |
//! |----------|-------------------------------------------|
//! | `int`    | a whole number in `i64` range (`2.0` too) |
//! | `float`  | any JSON number                           |
//! | `bool`   | a JSON boolean                            |
//! | `string` | a JSON string (other types not stringified) |
//!
//! Extraction is all-or-nothing: the first field that fails aborts the
//! whole event.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ExtractionError, PipelineError, Result};

/// Scalar type a pointer must resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Int,
    Float,
    Bool,
    String,
}

impl ScalarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::Int => "int",
            ScalarType::Float => "float",
            ScalarType::Bool => "bool",
            ScalarType::String => "string",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to find one field and what type it must have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerSpec {
    /// RFC 6901 JSON pointer, e.g. `/data/value`.
    pub pointer: String,
    /// Declared scalar type.
    #[serde(rename = "type")]
    pub scalar_type: ScalarType,
}

impl PointerSpec {
    pub fn new(pointer: impl Into<String>, scalar_type: ScalarType) -> Self {
        Self {
            pointer: pointer.into(),
            scalar_type,
        }
    }
}

/// A value extracted from an event, tagged with its scalar type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
}

impl TypedValue {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            TypedValue::Int(_) => ScalarType::Int,
            TypedValue::Float(_) => ScalarType::Float,
            TypedValue::Bool(_) => ScalarType::Bool,
            TypedValue::String(_) => ScalarType::String,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Int(v) => write!(f, "{}", v),
            TypedValue::Float(v) => write!(f, "{}", v),
            TypedValue::Bool(v) => write!(f, "{}", v),
            TypedValue::String(v) => write!(f, "{:?}", v),
        }
    }
}

/// Field name to extracted value, one entry per spec field.
pub type ExtractedRow = BTreeMap<String, TypedValue>;

/// Immutable mapping from output field name to [`PointerSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExtractionSpec {
    fields: BTreeMap<String, PointerSpec>,
}

impl ExtractionSpec {
    /// Parse and validate a spec from its JSON configuration form.
    ///
    /// Unknown scalar types, duplicate field names, malformed pointers and
    /// field names that cannot appear as statement placeholders are all
    /// configuration errors.
    pub fn from_json(json: &str) -> Result<Self> {
        let fields: UniqueFields = serde_json::from_str(json).map_err(|e| {
            PipelineError::Config(format!("invalid JSON pointer extractors: {}", e))
        })?;
        Self::new(fields.0)
    }

    /// Build a spec from already-typed entries.
    pub fn new(fields: BTreeMap<String, PointerSpec>) -> Result<Self> {
        if fields.is_empty() {
            return Err(PipelineError::Config(
                "extraction map must declare at least one field".to_string(),
            ));
        }

        for (name, spec) in &fields {
            if !is_identifier(name) {
                return Err(PipelineError::Config(format!(
                    "field name '{}' must match [A-Za-z_][A-Za-z0-9_]*",
                    name
                )));
            }
            validate_pointer(&spec.pointer).map_err(|reason| {
                PipelineError::Config(format!(
                    "field '{}': invalid pointer '{}': {}",
                    name, spec.pointer, reason
                ))
            })?;
        }

        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&PointerSpec> {
        self.fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PointerSpec)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Extract every field from a raw event body.
    pub fn extract(&self, payload: &[u8]) -> std::result::Result<ExtractedRow, ExtractionError> {
        let document: Value = serde_json::from_slice(payload)
            .map_err(|e| ExtractionError::InvalidJson(e.to_string()))?;
        self.extract_value(&document)
    }

    /// Extract every field from an already-parsed document.
    pub fn extract_value(
        &self,
        document: &Value,
    ) -> std::result::Result<ExtractedRow, ExtractionError> {
        let mut row = ExtractedRow::new();
        for (name, spec) in &self.fields {
            let value = resolve(document, name, spec)?;
            row.insert(name.clone(), value);
        }
        Ok(row)
    }
}

fn resolve(
    document: &Value,
    field: &str,
    spec: &PointerSpec,
) -> std::result::Result<TypedValue, ExtractionError> {
    let found = document
        .pointer(&spec.pointer)
        .ok_or_else(|| ExtractionError::PointerNotFound {
            field: field.to_string(),
            pointer: spec.pointer.clone(),
        })?;

    let typed = match (spec.scalar_type, found) {
        (ScalarType::Int, Value::Number(n)) => integral(n).map(TypedValue::Int),
        (ScalarType::Float, Value::Number(n)) => n.as_f64().map(TypedValue::Float),
        (ScalarType::Bool, Value::Bool(b)) => Some(TypedValue::Bool(*b)),
        (ScalarType::String, Value::String(s)) => Some(TypedValue::String(s.clone())),
        _ => None,
    };

    typed.ok_or_else(|| ExtractionError::TypeMismatch {
        field: field.to_string(),
        pointer: spec.pointer.clone(),
        expected: spec.scalar_type.as_str(),
        found: describe(found),
    })
}

/// Whole-valued numbers in `i64` range, including float tokens like `2.0`
/// or `1e3`.
fn integral(n: &serde_json::Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    let f = n.as_f64()?;
    // i64::MAX as f64 rounds up to 2^63, which is itself out of range.
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Number(n) if n.is_f64() => "float".to_string(),
        Value::Number(n) if n.is_u64() && n.as_i64().is_none() => {
            "integer out of i64 range".to_string()
        }
        Value::Number(_) => "int".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_pointer(pointer: &str) -> std::result::Result<(), &'static str> {
    if pointer.is_empty() {
        return Ok(());
    }
    if !pointer.starts_with('/') {
        return Err("must be empty or start with '/'");
    }
    let mut chars = pointer.chars();
    while let Some(c) = chars.next() {
        if c == '~' && !matches!(chars.next(), Some('0') | Some('1')) {
            return Err("'~' must be followed by '0' or '1'");
        }
    }
    Ok(())
}

/// Map deserializer that rejects repeated keys instead of keeping the last.
struct UniqueFields(BTreeMap<String, PointerSpec>);

impl<'de> Deserialize<'de> for UniqueFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct UniqueVisitor;

        impl<'de> Visitor<'de> for UniqueVisitor {
            type Value = UniqueFields;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field name to {\"pointer\", \"type\"}")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut fields = BTreeMap::new();
                while let Some((name, spec)) = access.next_entry::<String, PointerSpec>()? {
                    if fields.contains_key(&name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate field '{}'",
                            name
                        )));
                    }
                    fields.insert(name, spec);
                }
                Ok(UniqueFields(fields))
            }
        }

        deserializer.deserialize_map(UniqueVisitor)
    }
}
