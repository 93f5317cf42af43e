//! Response body redaction
//!
//! Token endpoint bodies can echo credentials back (tokens on success, the
//! submitted password or OTP on some validation errors). Anything derived
//! from a body that may reach a log line or a terminal goes through
//! [`render_body`].

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::constants::ERROR_BODY_DISPLAY_LIMIT;

/// JSON keys whose values are replaced, compared case-insensitively.
const SENSITIVE_KEYS: &[&str] = &[
    "access_token",
    "refresh_token",
    "client_secret",
    "password",
    "mfa_token",
    "otp",
    "x-otp",
];

const MASK: &str = "***";

/// Fallback for bodies that are not valid JSON (truncated, HTML-wrapped, ...).
/// Matches quoted values, quoted values cut off before their closing quote,
/// and bare scalars.
static SENSITIVE_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)("(?:access_token|refresh_token|client_secret|password|mfa_token|otp|x-otp)"\s*:\s*)(?:"[^"]*"?|[^",}\s]+)"#,
    )
    .expect("static redaction pattern compiles")
});

/// Form-encoded echoes of the submitted grant.
static SENSITIVE_FORM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b((?:access_token|refresh_token|client_secret|password|mfa_token|otp)=)[^&\s]*")
        .expect("static redaction pattern compiles")
});

/// Redact sensitive values from a raw body.
///
/// JSON bodies are walked recursively and re-serialized; anything else gets a
/// pattern-based pass over `"key": value` pairs and `key=value` form pairs.
pub fn redact_body(body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }

    if let Ok(mut value) = serde_json::from_slice::<Value>(body) {
        redact_value(&mut value);
        if let Ok(out) = serde_json::to_string(&value) {
            return out;
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = SENSITIVE_VALUE_RE.replace_all(&text, format!("${{1}}\"{MASK}\""));
    SENSITIVE_FORM_RE
        .replace_all(&text, format!("${{1}}{MASK}"))
        .into_owned()
}

/// Redact and cap a body for inclusion in error text.
pub fn render_body(body: &[u8]) -> String {
    truncate(redact_body(body), ERROR_BODY_DISPLAY_LIMIT)
}

fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *inner = Value::String(MASK.to_string());
                } else {
                    redact_value(inner);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        _ => {}
    }
}

fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

/// Cut `text` to at most `limit` characters, appending an ellipsis when cut.
fn truncate(text: String, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text,
    }
}
