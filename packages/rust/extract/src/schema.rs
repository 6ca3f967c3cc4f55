//! Validation of the model's JSON answer.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use hrdocs_shared::{HrDocsError, Result};

/// Keys the answer must carry, each with a string value.
pub const REQUIRED_KEYS: [&str; 6] = [
    "person_number",
    "document_type",
    "country",
    "document_code",
    "document_name",
    "date_from",
];

/// Fields extracted from one document, as returned by the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    pub person_number: String,
    pub document_type: String,
    pub country: String,
    pub document_code: String,
    pub document_name: String,
    pub date_from: String,
    pub date_to: Option<String>,
}

/// Parse and validate a raw model answer.
///
/// Accepts an optional Markdown code fence around the JSON. Fails with
/// [`HrDocsError::Schema`] unless the answer is an object holding every
/// [`REQUIRED_KEYS`] entry as a string; `date_to` is optional but must be a
/// string when present.
pub fn parse_extraction(raw: &str) -> Result<ExtractedFields> {
    let json = strip_code_fence(raw);
    if json.is_empty() {
        return Err(HrDocsError::schema("empty answer"));
    }

    let value: Value = serde_json::from_str(json)
        .map_err(|e| HrDocsError::schema(format!("answer is not valid JSON: {e}")))?;
    let Value::Object(object) = value else {
        return Err(HrDocsError::schema(format!(
            "expected a JSON object, got {}",
            kind(&value)
        )));
    };

    let date_to = match object.get("date_to") {
        None => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(other) => {
            return Err(HrDocsError::schema(format!(
                "field \"date_to\" must be a string, got {}",
                kind(other)
            )));
        }
    };

    Ok(ExtractedFields {
        person_number: required(&object, "person_number")?,
        document_type: required(&object, "document_type")?,
        country: required(&object, "country")?,
        document_code: required(&object, "document_code")?,
        document_name: required(&object, "document_name")?,
        date_from: required(&object, "date_from")?,
        date_to,
    })
}

fn required(object: &Map<String, Value>, key: &str) -> Result<String> {
    match object.get(key) {
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(other) => Err(HrDocsError::schema(format!(
            "field {key:?} must be a string, got {}",
            kind(other)
        ))),
        None => Err(HrDocsError::schema(format!("missing field {key:?}"))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn strip_code_fence(raw: &str) -> &str {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z]*\s*\n(.*?)\n?\s*```\s*$").expect("valid regex")
    });

    match FENCE_RE.captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => raw.trim(),
    }
}
