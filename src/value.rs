//! Dynamic runtime values checked by the validator and carried over the wire.
//!
//! Schemas describe shapes, `Value` is what inhabits them. The model is a
//! superset of JSON: it adds `Undefined` (distinct from `Null`), arbitrary
//! precision integers, raw byte buffers and dates, because the schema
//! language names all of those.

use std::collections::BTreeMap;

/// A dynamic value validated and encoded against a [`Schema`].
///
/// [`Schema`]: crate::schema::Schema
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value. Distinct from `Null`; optional properties holding
    /// `Undefined` are treated as not present.
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    /// Integer with more range than `f64` can hold exactly.
    BigInt(i128),
    String(String),
    /// Instant as milliseconds since the unix epoch.
    Date(i64),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Builds an object value from `(key, value)` pairs.
    pub fn object<K, I>(entries: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }

    /// Builds an array value.
    pub fn array<I>(elements: I) -> Value
    where
        I: IntoIterator<Item = Value>,
    {
        Value::Array(elements.into_iter().collect())
    }

    /// Runtime type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::BigInt(_) => "bigint",
            Value::String(_) => "string",
            Value::Date(_) => "Date",
            Value::Bytes(_) => "buffer",
            Value::Array(_) => "Array",
            Value::Object(_) => "object",
        }
    }

    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `true` for both `Undefined` and `Null`.
    #[inline]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Object property lookup. `None` for non-objects and absent keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Converts to a JSON value.
    ///
    /// JSON has no counterpart for part of the model, so the mapping is
    /// lossy: `Undefined` becomes `null`, big integers become decimal
    /// strings, dates become millisecond numbers and byte buffers become
    /// number arrays. This is the representation `Any`-typed wire payloads
    /// travel in.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::BigInt(i) => serde_json::Value::String(i.to_string()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Date(ms) => serde_json::Value::Number((*ms).into()),
            Value::Bytes(bytes) => serde_json::Value::Array(
                bytes.iter().map(|b| serde_json::Value::Number((*b).into())).collect(),
            ),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Converts from a JSON value. Inverse of [`Value::to_json`] up to the
    /// documented lossiness.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Value {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Value {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Value {
        Value::Number(f64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Value {
        Value::Number(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Value {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Value {
        Value::String(value)
    }
}

#[cfg(test)]
mod tests {
    use super::Value;

    #[test]
    fn json_round_trip() {
        let value = Value::object([
            ("name", Value::from("quill")),
            ("score", Value::from(7.5)),
            ("tags", Value::array([Value::from("a"), Value::from("b")])),
            ("extra", Value::Null),
        ]);

        let json = value.to_json();
        assert_eq!(Value::from_json(&json), value);
    }

    #[test]
    fn undefined_collapses_to_null_in_json() {
        assert_eq!(Value::Undefined.to_json(), serde_json::Value::Null);
        assert_eq!(Value::from_json(&serde_json::Value::Null), Value::Null);
    }
}
