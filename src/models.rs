//! Data model for weather observations moving through the job
//!
//! [`RawWeatherResponse`] is the provider's JSON document for one city,
//! [`NormalizedRow`] is its flattened, single-level form ready for the
//! warehouse. Both keep the provider's key order.

use crate::{LoadError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Provider response for one city at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawWeatherResponse {
    body: Map<String, Value>,
}

impl RawWeatherResponse {
    /// Wrap a parsed JSON document; anything but an object is rejected
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(body) => Ok(Self { body }),
            other => Err(LoadError::parse(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Success indicator as sent by the provider.
    ///
    /// The provider omits the field on success, so `None` means success.
    #[must_use]
    pub fn success(&self) -> Option<&Value> {
        self.body.get("success")
    }

    /// Whether the provider reported a failure.
    ///
    /// Any present `success` value that is falsy (`false`, `null`, zero, or
    /// an empty string, array or object) counts as a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.success().is_some_and(|flag| !is_truthy(flag))
    }

    /// Provider error message (`error.info`), if any
    #[must_use]
    pub fn error_info(&self) -> Option<&str> {
        self.body
            .get("error")
            .and_then(|error| error.get("info"))
            .and_then(Value::as_str)
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.body
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Single-level row with flattened column names
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedRow {
    columns: Map<String, Value>,
}

impl NormalizedRow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column, returning `false` if the name was already taken
    pub fn insert(&mut self, column: String, value: Value) -> bool {
        if self.columns.contains_key(&column) {
            return false;
        }
        self.columns.insert(column, value);
        true
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Column names in provider order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
