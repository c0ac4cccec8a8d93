//! Flattening of provider responses into warehouse rows

use crate::models::{NormalizedRow, RawWeatherResponse};
use crate::{LoadError, Result};
use serde_json::{Map, Value};
use tracing::debug;

/// Separator between nested key path segments
pub const SEPARATOR: &str = "_";

/// Flatten a nested mapping into `(column, value)` pairs.
///
/// Objects are walked depth-first in document order; arrays and scalars are
/// leaves. An empty nested object contributes nothing. Dots inside keys are
/// replaced by the separator as well.
#[must_use]
pub fn flatten(map: &Map<String, Value>) -> Vec<(String, Value)> {
    let mut columns = Vec::new();
    flatten_into(&mut columns, None, map);
    columns
}

fn flatten_into(out: &mut Vec<(String, Value)>, prefix: Option<&str>, map: &Map<String, Value>) {
    for (key, value) in map {
        let key = key.replace('.', SEPARATOR);
        let column = match prefix {
            Some(prefix) => format!("{prefix}{SEPARATOR}{key}"),
            None => key,
        };

        match value {
            Value::Object(nested) => flatten_into(out, Some(column.as_str()), nested),
            leaf => out.push((column, leaf.clone())),
        }
    }
}

/// Turn one provider response into exactly one row
pub fn normalize(raw: &RawWeatherResponse) -> Result<NormalizedRow> {
    let mut row = NormalizedRow::new();

    for (column, value) in flatten(raw.as_map()) {
        if !row.insert(column.clone(), value) {
            return Err(LoadError::parse(format!(
                "flattening produced column '{column}' twice"
            )));
        }
    }

    if row.is_empty() {
        return Err(LoadError::parse("response has no fields to load"));
    }

    debug!(columns = row.len(), "Flattened weather response");
    Ok(row)
}
