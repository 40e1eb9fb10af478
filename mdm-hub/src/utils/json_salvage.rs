//! Lenient JSON object extraction from model output
//!
//! Language models wrap JSON in prose, code fences or streaming lines.
//! Extraction order:
//! 1. Whole text parses as a JSON object
//! 2. Substring between the first `{` and the last `}`
//! 3. Last line that parses as a JSON object
//!
//! Anything else yields `None`; callers treat that as malformed output.

use serde_json::{Map, Value};

/// Extract a JSON object from free-form text
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    if let Some(object) = parse_object(text.trim()) {
        return Some(object);
    }

    if let (Some(first), Some(last)) = (text.find('{'), text.rfind('}')) {
        if last > first {
            if let Some(object) = parse_object(&text[first..=last]) {
                return Some(object);
            }
        }
    }

    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .filter_map(parse_object)
        .last()
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Read a JSON value as an optional, non-empty string.
///
/// Numbers are accepted (models often emit house numbers or postal codes
/// as integers); `null`, empty strings and nested values are not.
pub fn value_as_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
