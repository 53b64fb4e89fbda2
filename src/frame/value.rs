//! Cell and key values for in-memory frames.

use serde::Serialize;

/// A single cell in a [`Frame`](super::Frame).
///
/// CSV ingestion produces only `Null` (empty cell) and `Str`; the other
/// variants come from flattened JSON payloads and computed aggregate columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Convert into a group/join key component. `None` for `Null` (rows with
    /// null key parts are excluded from grouping) and for the variants that
    /// are not legal key types (`Float`, `Bool`).
    pub fn as_key(&self) -> Option<KeyValue> {
        match self {
            Value::Str(s) => Some(KeyValue::Str(s.clone())),
            Value::Int(n) => Some(KeyValue::Int(*n)),
            Value::Null | Value::Float(_) | Value::Bool(_) => None,
        }
    }

    /// Render the cell for string comparison in predicates. `None` for null.
    pub fn render(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Str(s) => Some(s.clone()),
            Value::Int(n) => Some(n.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Bool(b) => Some(b.to_string()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Str(_) => "str",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
        }
    }

    /// Map a parsed JSON value to a cell. Nested objects and arrays are kept
    /// as their compact JSON text; the flattener only splits the top level.
    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Str(s.clone()),
            other => Value::Str(other.to_string()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Str(s) => write!(f, "{s}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// The hashable, totally ordered subset of [`Value`] legal in group and join
/// keys. Bucket keys are `Str` (entity id, date) and `Int` (hour).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    Int(i64),
    Str(String),
}

impl KeyValue {
    pub fn into_value(self) -> Value {
        match self {
            KeyValue::Int(n) => Value::Int(n),
            KeyValue::Str(s) => Value::Str(s),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            KeyValue::Int(_) => "int",
            KeyValue::Str(_) => "str",
        }
    }
}

impl std::fmt::Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyValue::Int(n) => write!(f, "{n}"),
            KeyValue::Str(s) => write!(f, "{s}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
