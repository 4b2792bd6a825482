//! Canonical scalar value representation shared across the filter, planner,
//! and mutation layers.
//!
//! JSON columns carry a tri-state null: a column-level null
//! ([`Value::Null`]), an explicit JSON `null` inside the payload
//! ([`Value::Json`] wrapping [`serde_json::Value::Null`]), and a concrete
//! payload. The three states survive round trips and are never collapsed.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Typed scalar value tagged with explicit type information so serialized
/// rows remain unambiguous.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Database null (absent value for a nullable column).
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Signed 64-bit integer literal.
    Int(i64),
    /// 64-bit floating point literal.
    Float(f64),
    /// UTF-8 string literal. Enum values are stored as their string names.
    String(String),
    /// Nanoseconds since Unix epoch in UTC.
    DateTime(i128),
    /// Structured JSON payload. `Json(serde_json::Value::Null)` is the
    /// explicit JSON null, distinct from [`Value::Null`].
    Json(serde_json::Value),
}

/// A stored row: one [`Value`] per schema field, in declaration order.
pub type Row = Vec<Value>;

impl Value {
    /// Current wall-clock time as a [`Value::DateTime`].
    pub fn now() -> Self {
        Value::DateTime(OffsetDateTime::now_utc().unix_timestamp_nanos())
    }

    /// True for the database-level null only.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short type label used in validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Json(_) => "json",
        }
    }

    /// Partial comparison between same-typed values. Mixed int/float pairs
    /// compare numerically; anything else cross-typed yields `None`.
    pub fn partial_cmp_value(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Total ordering used for sort keys and cursor anchoring. Nulls sort
    /// according to the planner's nulls policy before this is consulted;
    /// incomparable pairs fall back to a stable type-rank order.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        if let Some(ord) = self.partial_cmp_value(other) {
            return ord;
        }
        self.type_rank().cmp(&other.type_rank())
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 2,
            Value::String(_) => 3,
            Value::DateTime(_) => 4,
            Value::Json(_) => 5,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Json(value)
    }
}

/// Write-side state of a JSON column.
///
/// `Omitted` leaves the stored value untouched (or applies the schema
/// default on create); the other variants overwrite it.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum JsonInput {
    /// Field not supplied by the caller.
    #[default]
    Omitted,
    /// Store a database null.
    DbNull,
    /// Store an explicit JSON `null` payload.
    JsonNull,
    /// Store a concrete JSON payload.
    Value(serde_json::Value),
}

impl JsonInput {
    /// Resolves the input into a stored [`Value`], or `None` when omitted.
    pub fn into_stored(self) -> Option<Value> {
        match self {
            JsonInput::Omitted => None,
            JsonInput::DbNull => Some(Value::Null),
            JsonInput::JsonNull => Some(Value::Json(serde_json::Value::Null)),
            JsonInput::Value(v) => Some(Value::Json(v)),
        }
    }
}

/// Null sentinel accepted by JSON `equals` filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JsonNullFilter {
    /// Match the database-level null only.
    DbNull,
    /// Match the explicit JSON `null` payload only.
    JsonNull,
    /// Match either null form.
    AnyNull,
}

impl JsonNullFilter {
    /// Whether a stored value satisfies this sentinel.
    pub fn matches(&self, stored: &Value) -> bool {
        match self {
            JsonNullFilter::DbNull => matches!(stored, Value::Null),
            JsonNullFilter::JsonNull => matches!(stored, Value::Json(serde_json::Value::Null)),
            JsonNullFilter::AnyNull => {
                matches!(stored, Value::Null | Value::Json(serde_json::Value::Null))
            }
        }
    }
}
