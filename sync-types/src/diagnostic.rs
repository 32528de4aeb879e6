//! Field-level parsing diagnostics.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// A single field that could not be coerced into its canonical type.
///
/// Diagnostics are ephemeral: they are logged and counted, never persisted,
/// and never block the record or the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseDiagnostic {
    /// Record the bad field belongs to.
    pub record_id: String,
    /// Remote field name the value came from.
    pub field_name: String,
    /// The raw value as delivered.
    pub raw_value: Value,
    /// JSON type of the raw value ("string", "number", ...).
    pub raw_type: &'static str,
    /// Why the value was rejected.
    pub reason: String,
}

impl ParseDiagnostic {
    /// Build a diagnostic for `raw_value`, deriving its type name.
    pub fn new(
        record_id: impl Into<String>,
        field_name: impl Into<String>,
        raw_value: &Value,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            field_name: field_name.into(),
            raw_type: json_type_name(raw_value),
            raw_value: raw_value.clone(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "record {}: field {:?} = {} ({}): {}",
            self.record_id, self.field_name, self.raw_value, self.raw_type, self.reason
        )
    }
}

/// Name of a JSON value's type, for diagnostics.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
