//! JSON response envelopes returned from every D-Bus method.
//!
//! Success: the payload's fields plus `"success": true`.
//! Failure: `{"success": false, "error": "..."}` plus any extra fields.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt::Display;

pub fn success<T: Serialize>(payload: &T) -> String {
    match serde_json::to_value(payload) {
        Ok(Value::Object(mut fields)) => {
            fields.insert("success".into(), Value::Bool(true));
            Value::Object(fields).to_string()
        }
        Ok(other) => json!({ "success": true, "result": other }).to_string(),
        Err(e) => failure(format!("failed to serialize response: {e}")),
    }
}

pub fn failure(error: impl Display) -> String {
    failure_with(error, Map::new())
}

/// Failure envelope carrying extra fields, e.g. an empty `faces` list.
pub fn failure_with(error: impl Display, mut extra: Map<String, Value>) -> String {
    extra.insert("success".into(), Value::Bool(false));
    extra.insert("error".into(), Value::String(error.to_string()));
    Value::Object(extra).to_string()
}

pub fn from_result<T: Serialize, E: Display>(result: Result<T, E>) -> String {
    match result {
        Ok(payload) => success(&payload),
        Err(e) => failure(e),
    }
}
