//! Dynamic SQL values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, TypeError};

/// A dynamically-typed SQL value.
///
/// Entity fields, row columns and query parameters all travel through the
/// core as `Value`s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    #[default]
    Null,

    /// Boolean value
    Bool(bool),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 64-bit floating point
    Double(f64),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// JSON value
    Json(serde_json::Value),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value counts as "empty" for identifier purposes.
    ///
    /// NULL, the empty string, integer zero and `false` are empty. An entity
    /// whose identifier field holds an empty value has never been persisted.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !*b,
            Value::Int(v) => *v == 0,
            Value::BigInt(v) => *v == 0,
            Value::Text(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Double(_) | Value::Json(_) => false,
        }
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Json(_) => "JSON",
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            Value::BigInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(f64::from(*v)),
            Value::BigInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Compare two values, treating all integer widths as one numeric domain.
    ///
    /// Drivers are free to return `BigInt` for a column that was written as
    /// `Int`; identity lookups and key matching go through this comparison.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_integer(), other.as_integer()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Build a hashable key whose equality matches [`Value::loose_eq`].
    pub fn key(&self) -> ValueKey {
        ValueKey(self.clone())
    }

    fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Json(v) => write!(f, "{}", v),
        }
    }
}

/// Hashable wrapper around a [`Value`] used for identifier lookups.
///
/// Integer variants hash and compare as one domain so that `Int(1)` and
/// `BigInt(1)` address the same row.
#[derive(Debug, Clone)]
pub struct ValueKey(Value);

impl ValueKey {
    /// The wrapped value.
    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl PartialEq for ValueKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.loose_eq(&other.0)
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0 {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Int(_) | Value::BigInt(_) => {
                2u8.hash(state);
                self.0.as_integer().hash(state);
            }
            Value::Double(v) => {
                3u8.hash(state);
                v.to_bits().hash(state);
            }
            Value::Text(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Value::Bytes(b) => {
                5u8.hash(state);
                b.hash(state);
            }
            Value::Json(j) => {
                6u8.hash(state);
                j.to_string().hash(state);
            }
        }
    }
}

// Conversion implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Convert a `u64` to `Value`, returning an error if the value exceeds `i64::MAX`.
impl TryFrom<u64> for Value {
    type Error = Error;

    fn try_from(v: u64) -> Result<Self, Self::Error> {
        i64::try_from(v).map(Value::BigInt).map_err(|_| {
            Error::Type(TypeError {
                expected: "u64 <= i64::MAX",
                actual: format!("u64 value {} exceeds i64::MAX ({})", v, i64::MAX),
                column: None,
                rust_type: Some("u64"),
            })
        })
    }
}

/// Convert a scalar JSON value into a `Value`.
///
/// Objects and arrays stay wrapped as [`Value::Json`].
pub fn from_json(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::BigInt)
            .or_else(|| n.as_f64().map(Value::Double))
            .unwrap_or(Value::Null),
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => Value::Json(other.clone()),
    }
}

/// Convert a `Value` into its JSON representation.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(v) => serde_json::Value::from(*v),
        Value::BigInt(v) => serde_json::Value::from(*v),
        Value::Double(v) => serde_json::Value::from(*v),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::from(b.clone()),
        Value::Json(j) => j.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_from_integers() {
        assert_eq!(Value::from(42i32), Value::Int(42));
        assert_eq!(Value::from(42i64), Value::BigInt(42));
        assert_eq!(Value::from(42u32), Value::BigInt(42));
    }

    #[test]
    fn test_from_option() {
        let some: Value = Some(42i32).into();
        assert_eq!(some, Value::Int(42));

        let none: Value = Option::<i32>::None.into();
        assert_eq!(none, Value::Null);
    }

    #[test]
    fn test_try_from_u64() {
        assert_eq!(Value::try_from(7u64).unwrap(), Value::BigInt(7));
        assert!(Value::try_from(u64::MAX).is_err());
    }

    #[test]
    fn test_is_empty() {
        assert!(Value::Null.is_empty());
        assert!(Value::Text(String::new()).is_empty());
        assert!(Value::Int(0).is_empty());
        assert!(Value::BigInt(0).is_empty());
        assert!(Value::Bool(false).is_empty());

        assert!(!Value::Text("0".to_string()).is_empty());
        assert!(!Value::BigInt(1).is_empty());
        assert!(!Value::Double(0.0).is_empty());
    }

    #[test]
    fn test_loose_eq_across_integer_widths() {
        assert!(Value::Int(1).loose_eq(&Value::BigInt(1)));
        assert!(!Value::Int(1).loose_eq(&Value::BigInt(2)));
        assert!(!Value::Int(1).loose_eq(&Value::Text("1".to_string())));
    }

    #[test]
    fn test_value_key_hash_matches_loose_eq() {
        let mut keys = HashSet::new();
        keys.insert(Value::Int(5).key());
        assert!(keys.contains(&Value::BigInt(5).key()));
        assert!(!keys.contains(&Value::Text("5".to_string()).key()));
    }

    #[test]
    fn test_json_conversion() {
        assert_eq!(from_json(&serde_json::json!(3)), Value::BigInt(3));
        assert_eq!(from_json(&serde_json::json!("a")), Value::Text("a".into()));
        assert_eq!(to_json(&Value::Int(2)), serde_json::json!(2));
        assert_eq!(to_json(&Value::Null), serde_json::Value::Null);
    }
}
