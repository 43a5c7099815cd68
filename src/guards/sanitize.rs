//! # Input Sanitization
//!
//! Rewrites structured request bodies after every guard has passed: HTML
//! tags and `javascript:` schemes are stripped from string values, and
//! object keys that look like inline event handlers (`onclick`, `onload`,
//! ...) are dropped entirely.
//!
//! Stripping runs to a fixed point so the result is idempotent: sanitizing
//! an already-sanitized body changes nothing, and constructions like
//! `<scr<script>ipt>` cannot reassemble into a tag after one pass.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag pattern"));
static SCHEME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)javascript\s*:").expect("scheme pattern"));
static HANDLER_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^on[a-z]+$").expect("handler key pattern"));

/// Strip disallowed content from a string, repeating until stable
fn sanitize_string(input: &str) -> String {
    let mut current = input.to_string();
    loop {
        let stripped = TAG_PATTERN.replace_all(&current, "");
        let stripped = SCHEME_PATTERN.replace_all(&stripped, "");
        if stripped == current {
            return current;
        }
        current = stripped.into_owned();
    }
}

/// Recursively sanitize a JSON value in place. Returns whether anything was
/// rewritten.
pub fn sanitize_json(value: &mut Value) -> bool {
    match value {
        Value::String(s) => {
            let cleaned = sanitize_string(s);
            if cleaned != *s {
                *s = cleaned;
                true
            } else {
                false
            }
        }
        Value::Array(items) => {
            let mut changed = false;
            for item in items {
                changed |= sanitize_json(item);
            }
            changed
        }
        Value::Object(map) => {
            let handler_keys: Vec<String> = map
                .keys()
                .filter(|k| HANDLER_KEY_PATTERN.is_match(k))
                .cloned()
                .collect();
            let mut changed = !handler_keys.is_empty();
            for key in handler_keys {
                map.remove(&key);
            }
            for (_, item) in map.iter_mut() {
                changed |= sanitize_json(item);
            }
            changed
        }
        _ => false,
    }
}
