//! Resolution of templated config values against the execution context.
//!
//! A config value is either a literal, a full-match `{{ path.to.value }}`
//! expression, or a bare `context.path.to.value` reference. There is no partial
//! interpolation: `"Hello {{ lead.name }}"` stays a literal string.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

const CONTEXT_PREFIX: &str = "context.";
const OUTPUTS_KEY: &str = "outputs";

fn expression_regex() -> &'static Regex {
    static EXPRESSION: OnceLock<Regex> = OnceLock::new();
    EXPRESSION.get_or_init(|| {
        Regex::new(r"^\{\{\s*([^{}]+?)\s*\}\}$").expect("expression pattern is valid")
    })
}

/// Extract the dot-path referenced by a templated string, if it is one.
pub fn expression_path(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(captures) = expression_regex().captures(trimmed) {
        let path = captures.get(1)?.as_str().trim();
        return Some(path.strip_prefix(CONTEXT_PREFIX).unwrap_or(path));
    }
    if let Some(path) = trimmed.strip_prefix(CONTEXT_PREFIX) {
        if !path.is_empty() && !path.chars().any(char::is_whitespace) {
            return Some(path);
        }
    }
    None
}

/// Resolve a config value. Missing paths resolve to `Value::Null`.
pub fn resolve(value: &Value, context: &Value) -> Value {
    match value {
        Value::String(text) => match expression_path(text) {
            Some(path) => lookup_path(context, path).cloned().unwrap_or(Value::Null),
            None => value.clone(),
        },
        other => other.clone(),
    }
}

/// Dot-path lookup; numeric segments index arrays.
pub fn lookup_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.').map(str::trim) {
        if segment.is_empty() {
            return None;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a scalar as trimmed text. Null, objects and arrays yield `None`.
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Integer view of a JSON number or numeric string.
pub fn value_as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Numeric view of a JSON number or numeric string.
pub fn value_as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Resolve an optional config value and render it as text; empty when absent.
pub fn resolve_string(value: Option<&Value>, context: &Value) -> String {
    value
        .map(|raw| resolve(raw, context))
        .and_then(|resolved| value_to_text(&resolved))
        .unwrap_or_default()
}

pub fn resolve_integer(value: Option<&Value>, context: &Value) -> Option<i64> {
    value
        .map(|raw| resolve(raw, context))
        .and_then(|resolved| value_as_integer(&resolved))
}

/// Deep-merge `patch` into `target`; objects merge key by key, anything else replaces.
pub fn merge_value(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match target_map.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target_value, patch_value) => {
            *target_value = patch_value.clone();
        }
    }
}

/// Merge a node's output record into `context.outputs.<node_id>`.
pub fn record_node_output(context: &mut Value, node_id: &str, record: &Value) {
    if !context.is_object() {
        *context = Value::Object(Map::new());
    }
    let mut patch = Map::new();
    let mut node_entry = Map::new();
    node_entry.insert(node_id.to_string(), record.clone());
    patch.insert(OUTPUTS_KEY.to_string(), Value::Object(node_entry));
    merge_value(context, &Value::Object(patch));
}

/// Output record previously stored for `node_id`.
pub fn node_output<'a>(context: &'a Value, node_id: &str) -> Option<&'a Value> {
    context.get(OUTPUTS_KEY).and_then(|outputs| outputs.get(node_id))
}
