//! Explicit value coercion for environment overrides.
//!
//! When a process environment variable overrides a declared variable, the
//! textual value is coerced to the type of the declared value. This is the
//! single place that inference happens; nothing else in the engine guesses
//! types from strings.

use serde_json::{Number, Value};

/// Coerces `raw` to the type of `declared`.
///
/// - Booleans recognize `true/false/1/0/yes/no`, case-insensitively; an
///   unrecognized token leaves the declared value unchanged.
/// - Numbers parse as `i64` first, then `f64`; unparseable text leaves the
///   declared value unchanged.
/// - Everything else becomes text.
pub fn coerce_to_declared_type(declared: &Value, raw: &str) -> Value {
    match declared {
        Value::Bool(_) => match parse_bool(raw) {
            Some(flag) => Value::Bool(flag),
            None => declared.clone(),
        },
        Value::Number(_) => match parse_number(raw) {
            Some(number) => Value::Number(number),
            None => declared.clone(),
        },
        _ => Value::String(raw.to_string()),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn parse_number(raw: &str) -> Option<Number> {
    let trimmed = raw.trim();
    if let Ok(integer) = trimmed.parse::<i64>() {
        return Some(Number::from(integer));
    }
    trimmed.parse::<f64>().ok().and_then(Number::from_f64)
}
