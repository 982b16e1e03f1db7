//! Template resolution and expression evaluation against a scene scope.
//!
//! String properties may embed `${{ ... }}` templates; conditions and loop
//! attributes are plain expressions. Supported roots:
//!
//! - `vars.*` — the owning scope's variables (local over inheritable)
//! - `env.*` — process environment captured at root bootstrap
//! - `loop.key` / `loop.value` — the current loop position
//! - `parent.*` — the state object handed down by the parent step
//!
//! Conditions support equality (`==`, `!=`), leading negation (`!`), and
//! truthiness of a resolved value. Evaluation never fails: an unresolvable
//! expression is undefined, which is falsy.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Snapshot of everything an expression can see.
#[derive(Debug, Default, Clone)]
pub struct ScopeContext {
    /// Variables visible to the owning scope, local entries overriding
    /// inheritable ones.
    pub vars: Map<String, Value>,
    /// Process environment.
    pub env: HashMap<String, String>,
    /// Loop index or mapping key when iterating.
    pub loop_key: Option<Value>,
    /// Loop element when iterating.
    pub loop_value: Option<Value>,
    /// State object handed down by the parent step.
    pub parent: Value,
}

/// Strips a `${{ ... }}` wrapper from an expression, if present.
pub fn normalize_expression(raw_expression: &str) -> String {
    let trimmed = raw_expression.trim();
    if let Some(stripped) = trimmed.strip_prefix("${{") {
        let inner = stripped.trim();
        let inner = inner.strip_suffix("}}").unwrap_or(inner);
        inner.trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Recursively interpolates `${{ ... }}` templates in a JSON value.
pub fn interpolate_value(value: &Value, context: &ScopeContext) -> Value {
    match value {
        Value::String(string_value) => interpolate_string_value(string_value, context),
        Value::Array(array_values) => Value::Array(
            array_values
                .iter()
                .map(|array_value| interpolate_value(array_value, context))
                .collect(),
        ),
        Value::Object(object_map) => {
            let mut interpolated_map = Map::new();
            for (key, nested_value) in object_map.iter() {
                interpolated_map.insert(key.clone(), interpolate_value(nested_value, context));
            }
            Value::Object(interpolated_map)
        }
        _ => value.clone(),
    }
}

/// Interpolates a single string. A string that is exactly one template
/// (`"${{ vars.list }}"`) resolves to the referenced value itself so lists
/// and mappings survive substitution; mixed text renders to a string.
fn interpolate_string_value(input_string: &str, context: &ScopeContext) -> Value {
    let trimmed = input_string.trim();
    if trimmed.starts_with("${{")
        && trimmed.ends_with("}}")
        && trimmed.matches("${{").count() == 1
        && let Some(resolved) = resolve_expression_value(&normalize_expression(trimmed), context)
    {
        return resolved;
    }
    Value::String(interpolate_string(input_string, context))
}

fn interpolate_string(input_string: &str, context: &ScopeContext) -> String {
    let mut output_string = String::new();
    let mut remaining_string = input_string;
    let mut processed_any_template = false;

    while let Some(template_start) = remaining_string.find("${{") {
        let (string_before_template, string_after_template) = remaining_string.split_at(template_start);
        output_string.push_str(string_before_template);

        if let Some(template_end_index) = string_after_template.find("}}") {
            let template_expression = string_after_template[3..template_end_index].trim();
            let resolved_value = resolve_expression(template_expression, context).unwrap_or_default();
            output_string.push_str(&resolved_value);
            remaining_string = &string_after_template[template_end_index + 2..];
            processed_any_template = true;
        } else {
            // No closing marker; preserve the rest as-is.
            output_string.push_str(string_after_template);
            return output_string;
        }
    }

    if processed_any_template {
        output_string.push_str(remaining_string);
        output_string
    } else {
        input_string.to_string()
    }
}

/// Evaluates a conditional expression to a boolean.
pub fn eval_condition(expression: &str, context: &ScopeContext) -> bool {
    let expression = normalize_expression(expression);
    let (negations, remainder) = strip_leading_negations(&expression);
    let value = if let Some(position) = find_operator(remainder, "!=") {
        let left = resolve_operand(remainder[..position].trim(), context);
        let right = resolve_operand(remainder[position + 2..].trim(), context);
        left != right
    } else if let Some(position) = find_operator(remainder, "==") {
        let left = resolve_operand(remainder[..position].trim(), context);
        let right = resolve_operand(remainder[position + 2..].trim(), context);
        left == right
    } else {
        is_truthy(&resolve_expression_value(remainder, context).unwrap_or(Value::Null))
    };
    if negations % 2 == 1 { !value } else { value }
}

/// Evaluates a conditional attribute which may be a literal or an expression.
pub fn eval_condition_attribute(attribute: &Value, context: &ScopeContext) -> bool {
    match attribute {
        Value::String(expression) => eval_condition(expression, context),
        other => is_truthy(other),
    }
}

/// Evaluates a loop/async/detach attribute to a value: strings are resolved
/// as expressions (comparisons evaluate to a boolean), everything else is
/// taken literally.
pub fn eval_value_attribute(attribute: &Value, context: &ScopeContext) -> Value {
    match attribute {
        Value::String(expression) => {
            let normalized = normalize_expression(expression);
            if is_condition_expression(&normalized) {
                return Value::Bool(eval_condition(&normalized, context));
            }
            resolve_expression_value(&normalized, context).unwrap_or(Value::Null)
        }
        other => other.clone(),
    }
}

fn is_condition_expression(expression: &str) -> bool {
    expression.starts_with('!') || find_operator(expression, "==").is_some() || find_operator(expression, "!=").is_some()
}

/// Truthiness of a resolved value: null, `false`, `0`, and `""` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn strip_leading_negations(expression: &str) -> (usize, &str) {
    let mut count = 0usize;
    let mut remainder = expression.trim_start();
    while let Some(stripped) = remainder.strip_prefix('!') {
        if stripped.starts_with('=') {
            break;
        }
        count += 1;
        remainder = stripped.trim_start();
    }
    (count, remainder)
}

fn find_operator(expression: &str, operator: &str) -> Option<usize> {
    let mut in_single_quote = false;
    let mut in_double_quote = false;

    for (index, character) in expression.char_indices() {
        match character {
            '\'' if !in_double_quote => in_single_quote = !in_single_quote,
            '"' if !in_single_quote => in_double_quote = !in_double_quote,
            _ => {}
        }
        if !in_single_quote && !in_double_quote && expression[index..].starts_with(operator) {
            return Some(index);
        }
    }
    None
}

/// Resolves one side of a comparison: a JSON literal, a quoted string, or a
/// context path. Comparison happens on the canonical string form so
/// `vars.count == "3"` holds whether the variable is numeric or textual.
fn resolve_operand(expression: &str, context: &ScopeContext) -> String {
    let trimmed = expression.trim();
    if (trimmed.starts_with('"') && trimmed.ends_with('"')) || (trimmed.starts_with('\'') && trimmed.ends_with('\'')) {
        return trimmed[1..trimmed.len() - 1].to_string();
    }
    if let Some(value) = resolve_expression_value(trimmed, context) {
        return format_json_value(&value);
    }
    trimmed.to_string()
}

/// Resolves a path expression to a raw JSON value.
pub fn resolve_expression_value(expression: &str, context: &ScopeContext) -> Option<Value> {
    let trimmed = expression.trim();

    if trimmed == "true" || trimmed == "false" || trimmed == "null" {
        return serde_json::from_str(trimmed).ok();
    }
    if trimmed.chars().next().map(|c| c.is_ascii_digit() || c == '-').unwrap_or(false)
        && let Ok(literal) = serde_json::from_str::<Value>(trimmed)
    {
        return Some(literal);
    }

    if let Some(variable_name) = trimmed.strip_prefix("env.") {
        return lookup_env(&context.env, variable_name).map(Value::String);
    }
    if let Some(remaining_expression) = trimmed.strip_prefix("vars.") {
        let mut expression_parts = remaining_expression.split('.');
        let variable_name = expression_parts.next()?;
        let variable_value = context.vars.get(variable_name)?;
        return navigate_json_path(variable_value, &expression_parts.collect::<Vec<_>>());
    }
    if let Some(remaining_expression) = trimmed.strip_prefix("parent.") {
        let expression_parts: Vec<&str> = remaining_expression.split('.').collect();
        return navigate_json_path(&context.parent, &expression_parts);
    }
    match trimmed {
        "loop.key" => context.loop_key.clone(),
        "loop.value" => context.loop_value.clone(),
        _ => {
            if let Some(remaining_expression) = trimmed.strip_prefix("loop.value.") {
                let loop_value = context.loop_value.as_ref()?;
                let expression_parts: Vec<&str> = remaining_expression.split('.').collect();
                return navigate_json_path(loop_value, &expression_parts);
            }
            None
        }
    }
}

fn resolve_expression(expression: &str, context: &ScopeContext) -> Option<String> {
    resolve_expression_value(expression, context).map(|value| format_json_value(&value))
}

/// Case-insensitive environment lookup; exact-case matches win.
fn lookup_env(env: &HashMap<String, String>, variable_name: &str) -> Option<String> {
    if let Some(value) = env.get(variable_name) {
        return Some(value.clone());
    }
    let lowered = variable_name.to_ascii_lowercase();
    env.iter()
        .find(|(key, _)| key.to_ascii_lowercase() == lowered)
        .map(|(_, value)| value.clone())
}

fn navigate_json_path(root_value: &Value, path_parts: &[&str]) -> Option<Value> {
    let mut current_value = root_value;
    for path_part in path_parts {
        if path_part.is_empty() {
            continue;
        }
        match current_value {
            Value::Object(object_map) => current_value = object_map.get(*path_part)?,
            Value::Array(array_values) => {
                let array_index = path_part.parse::<usize>().ok()?;
                current_value = array_values.get(array_index)?;
            }
            _ => return None,
        }
    }
    Some(current_value.clone())
}

fn format_json_value(value: &Value) -> String {
    match value {
        Value::String(string_value) => string_value.clone(),
        Value::Number(number_value) => number_value.to_string(),
        Value::Bool(boolean_value) => boolean_value.to_string(),
        Value::Null => String::new(),
        other_value => other_value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context_with_vars(vars: Value) -> ScopeContext {
        ScopeContext {
            vars: vars.as_object().cloned().unwrap_or_default(),
            ..ScopeContext::default()
        }
    }

    #[test]
    fn interpolates_vars_env_and_parent() {
        let mut context = context_with_vars(json!({"app": "demo"}));
        context.env.insert("REGION".into(), "us".into());
        context.parent = json!({"attempt": 2});

        let value = json!({
            "name": "${{ vars.app }}",
            "region": "${{ env.REGION }}",
            "attempt": "try ${{ parent.attempt }}"
        });
        let result = interpolate_value(&value, &context);
        assert_eq!(result["name"], "demo");
        assert_eq!(result["region"], "us");
        assert_eq!(result["attempt"], "try 2");
    }

    #[test]
    fn whole_string_template_preserves_value_type() {
        let context = context_with_vars(json!({"items": [1, 2, 3]}));
        let result = interpolate_value(&json!("${{ vars.items }}"), &context);
        assert_eq!(result, json!([1, 2, 3]));
    }

    #[test]
    fn conditions_support_equality_and_negation() {
        let context = context_with_vars(json!({"stage": "prod", "count": 3}));
        assert!(eval_condition("vars.stage == \"prod\"", &context));
        assert!(eval_condition("vars.count != \"4\"", &context));
        assert!(eval_condition("!vars.missing", &context));
        assert!(!eval_condition("vars.missing", &context));
    }

    #[test]
    fn condition_attribute_accepts_literals() {
        let context = ScopeContext::default();
        assert!(eval_condition_attribute(&json!(true), &context));
        assert!(!eval_condition_attribute(&json!(false), &context));
        assert!(!eval_condition_attribute(&json!(null), &context));
        assert!(!eval_condition_attribute(&json!(0), &context));
    }

    #[test]
    fn loop_roots_resolve_key_value_and_nested_paths() {
        let mut context = ScopeContext::default();
        context.loop_key = Some(json!(1));
        context.loop_value = Some(json!({"id": "b"}));
        assert_eq!(resolve_expression_value("loop.key", &context), Some(json!(1)));
        assert_eq!(resolve_expression_value("loop.value.id", &context), Some(json!("b")));
    }

    #[test]
    fn env_lookup_is_case_insensitive() {
        let mut context = ScopeContext::default();
        context.env.insert("More_Num".into(), "2".into());
        assert_eq!(resolve_expression_value("env.MORE_NUM", &context), Some(json!("2")));
    }

    #[test]
    fn value_attributes_with_comparisons_evaluate_to_booleans() {
        let context = context_with_vars(json!({"count": 0}));
        assert_eq!(eval_value_attribute(&json!("vars.count != \"3\""), &context), json!(true));
        assert_eq!(eval_value_attribute(&json!("vars.count"), &context), json!(0));
        assert_eq!(eval_value_attribute(&json!([1, 2]), &context), json!([1, 2]));
    }

    #[test]
    fn unresolved_whole_string_templates_render_empty() {
        let context = ScopeContext::default();
        assert_eq!(interpolate_value(&json!("${{ vars.missing }}"), &context), json!(""));
    }

    #[test]
    fn undefined_expressions_are_falsy_not_errors() {
        let context = ScopeContext::default();
        assert!(!eval_condition("vars.nothing.here", &context));
        assert_eq!(resolve_expression_value("vars.nothing.here", &context), None);
    }
}
