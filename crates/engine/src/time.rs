//! Duration parsing for step attributes.

use std::time::Duration;

use anyhow::{Result, bail};
use serde_json::Value;

/// Parses a wait-time attribute into a [`Duration`].
///
/// Accepts `"250ms"`, `"10s"`, `"2m"`, `"1h"`, a bare numeric string, or a
/// YAML number. A bare number is milliseconds.
pub fn parse_duration(value: &Value) -> Result<Duration> {
    match value {
        Value::Number(number) => {
            let Some(milliseconds) = number.as_u64() else {
                bail!("duration must be a non-negative number of milliseconds, got {number}");
            };
            Ok(Duration::from_millis(milliseconds))
        }
        Value::String(text) => parse_duration_text(text),
        other => bail!("duration must be a number or a string like '500ms', got {other}"),
    }
}

fn parse_duration_text(text: &str) -> Result<Duration> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        bail!("duration string is empty");
    }

    let (number_part, unit) = match trimmed.find(|c: char| c.is_ascii_alphabetic()) {
        Some(index) => trimmed.split_at(index),
        None => (trimmed, "ms"),
    };

    let quantity: u64 = number_part
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid duration '{trimmed}'"))?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(quantity)),
        "s" => Ok(Duration::from_secs(quantity)),
        "m" => Ok(Duration::from_secs(quantity * 60)),
        "h" => Ok(Duration::from_secs(quantity * 60 * 60)),
        other => bail!("unknown duration unit '{other}' in '{trimmed}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_each_documented_unit() {
        assert_eq!(parse_duration(&json!("250ms")).unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(&json!("10s")).unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration(&json!("2m")).unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration(&json!("1h")).unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn bare_numbers_are_milliseconds() {
        assert_eq!(parse_duration(&json!(500)).unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration(&json!("500")).unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration(&json!("soon")).is_err());
        assert!(parse_duration(&json!(-1)).is_err());
        assert!(parse_duration(&json!([1])).is_err());
    }
}
