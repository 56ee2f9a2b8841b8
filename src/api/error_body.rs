// Recover a human-readable message from an error response body.
//
// Servers answer with `{error?, message?}`, but the payload is sometimes
// double-encoded (a JSON string holding JSON) or returned as plain text that
// merely contains an `"error":"..."` fragment.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

const MAX_NESTING: usize = 3;

fn error_field_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#""error"\s*:\s*"((?:[^"\\]|\\.)*)""#).ok())
        .as_ref()
}

/// Extract the server's message from a raw error body, if one can be found.
pub fn extract_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::String(inner)) => extract_from_text(&inner, 1),
        Ok(value) => message_from_value(&value, 0),
        Err(_) => extract_from_text(trimmed, 0),
    }
}

/// Extract `error` (preferred) or `message` from an already-decoded JSON value.
pub fn message_from_value(value: &Value, depth: usize) -> Option<String> {
    let object = value.as_object()?;
    for field in ["error", "message"] {
        match object.get(field) {
            Some(Value::String(text)) if !text.trim().is_empty() => {
                return Some(unwrap_nested(text, depth + 1));
            }
            Some(nested @ Value::Object(_)) if depth < MAX_NESTING => {
                if let Some(message) = message_from_value(nested, depth + 1) {
                    return Some(message);
                }
            }
            _ => {}
        }
    }
    None
}

/// Treat `text` as possibly-encoded JSON; fall back to the `"error":"..."` pattern.
fn extract_from_text(text: &str, depth: usize) -> Option<String> {
    if depth > MAX_NESTING {
        return None;
    }
    let trimmed = text.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::String(inner)) => extract_from_text(&inner, depth + 1),
        Ok(value @ Value::Object(_)) => message_from_value(&value, depth),
        _ => extract_error_field(trimmed),
    }
}

/// A message field may itself hold an encoded error object.
fn unwrap_nested(text: &str, depth: usize) -> String {
    let trimmed = text.trim();
    if depth <= MAX_NESTING && (trimmed.starts_with('{') || trimmed.starts_with('"')) {
        if let Some(inner) = extract_from_text(trimmed, depth) {
            return inner;
        }
    }
    text.to_string()
}

fn extract_error_field(text: &str) -> Option<String> {
    let captures = error_field_pattern()?.captures(text)?;
    let raw = captures.get(1)?.as_str();
    let decoded = serde_json::from_str::<String>(&format!("\"{}\"", raw))
        .unwrap_or_else(|_| raw.to_string());
    if decoded.trim().is_empty() {
        None
    } else {
        Some(decoded)
    }
}
