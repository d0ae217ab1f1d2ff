//! Data bags passed between the engine and step handlers

use serde_json::{Map, Value};

/// Free-form key/value bag used for step config, execution input and outputs
pub type DataMap = Map<String, Value>;

/// Fold `source` into `target` key by key; later values win on collision.
pub fn merge_into(target: &mut DataMap, source: &DataMap) {
    for (key, value) in source {
        target.insert(key.clone(), value.clone());
    }
}

/// Read a numeric field from a bag, if present and numeric
pub fn number_field(bag: &DataMap, field: &str) -> Option<f64> {
    bag.get(field).and_then(Value::as_f64)
}

/// Build a bag from a JSON value, treating non-objects as empty
pub fn into_map(value: Value) -> DataMap {
    match value {
        Value::Object(map) => map,
        _ => DataMap::new(),
    }
}
