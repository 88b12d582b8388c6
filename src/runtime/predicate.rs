//! Branch predicates evaluated against node data.
//!
//! Supported forms:
//! - `path == value`, `path != value`
//! - `path > value`, `path >= value`, `path < value`, `path <= value` (numeric)
//! - `path contains value` (substring, array element or object key)
//! - `path` (truthiness), `!path` (negated truthiness)
//! - `true`, `false`
//!
//! `path` is a dotted key path (`review.score`). Values are parsed as JSON
//! when possible, otherwise taken as a string with surrounding quotes
//! removed. Unparseable expressions evaluate to `false`.

use crate::workflow::types::DataMap;
use serde_json::Value;

const OPERATORS: [&str; 6] = [">=", "<=", "!=", "==", ">", "<"];

/// Evaluate `expr` against `data`.
pub fn evaluate(expr: &str, data: &DataMap) -> bool {
    let expr = expr.trim();
    if expr.is_empty() {
        return false;
    }
    match expr {
        "true" => return true,
        "false" => return false,
        _ => {}
    }

    if let Some((path, literal)) = split_keyword(expr, " contains ") {
        return lookup(data, path).is_some_and(|actual| contains(actual, &parse_literal(literal)));
    }

    if let Some((path, op, literal)) = split_operator(expr) {
        let expected = parse_literal(literal);
        let actual = lookup(data, path).unwrap_or(&Value::Null);
        return compare(actual, op, &expected);
    }

    if let Some(path) = expr.strip_prefix('!') {
        return !lookup(data, path.trim()).is_some_and(is_truthy);
    }

    if expr.contains(char::is_whitespace) {
        return false;
    }
    lookup(data, expr).is_some_and(is_truthy)
}

/// Resolve a dotted path inside the data map
pub fn lookup<'a>(data: &'a DataMap, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = data.get(parts.next()?.trim())?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn split_keyword<'a>(expr: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    let at = expr.find(keyword)?;
    let path = expr[..at].trim();
    let literal = expr[at + keyword.len()..].trim();
    (!path.is_empty() && !literal.is_empty()).then_some((path, literal))
}

/// Find the leftmost comparison operator, preferring two-character ones
fn split_operator(expr: &str) -> Option<(&str, &'static str, &str)> {
    let (at, op) = OPERATORS
        .iter()
        .filter_map(|op| expr.find(op).map(|at| (at, *op)))
        .min_by_key(|(at, op)| (*at, std::cmp::Reverse(op.len())))?;
    let path = expr[..at].trim();
    let literal = expr[at + op.len()..].trim();
    (!path.is_empty() && !literal.is_empty()).then_some((path, op, literal))
}

fn parse_literal(literal: &str) -> Value {
    serde_json::from_str(literal).unwrap_or_else(|_| {
        Value::String(literal.trim_matches(|c| c == '"' || c == '\'').to_string())
    })
}

fn compare(actual: &Value, op: &str, expected: &Value) -> bool {
    match op {
        "==" => loosely_equal(actual, expected),
        "!=" => !loosely_equal(actual, expected),
        _ => match (as_number(actual), as_number(expected)) {
            (Some(a), Some(b)) => match op {
                ">" => a > b,
                ">=" => a >= b,
                "<" => a < b,
                "<=" => a <= b,
                _ => false,
            },
            _ => false,
        },
    }
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => display(actual) == display(expected),
    }
}

fn contains(actual: &Value, needle: &Value) -> bool {
    match actual {
        Value::String(s) => s.contains(&display(needle)),
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, needle)),
        Value::Object(map) => map.contains_key(&display(needle)),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JavaScript-style truthiness
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> DataMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_equality() {
        let ctx = data(json!({ "status": "success", "count": 3 }));
        assert!(evaluate(r#"status == "success""#, &ctx));
        assert!(evaluate("status == success", &ctx));
        assert!(!evaluate(r#"status == "failure""#, &ctx));
        assert!(evaluate(r#"status != "failure""#, &ctx));
        assert!(evaluate("count == 3", &ctx));
        assert!(evaluate("count == \"3\"", &ctx));
    }

    #[test]
    fn test_numeric_comparisons() {
        let ctx = data(json!({ "score": 7.5 }));
        assert!(evaluate("score > 5", &ctx));
        assert!(evaluate("score >= 7.5", &ctx));
        assert!(!evaluate("score < 5", &ctx));
        assert!(evaluate("score <= 10", &ctx));
        assert!(!evaluate("missing > 1", &ctx));
    }

    #[test]
    fn test_contains() {
        let ctx = data(json!({
            "output": "The file was created successfully.",
            "tags": ["rust", "async"],
        }));
        assert!(evaluate(r#"output contains "created""#, &ctx));
        assert!(!evaluate(r#"output contains "deleted""#, &ctx));
        assert!(evaluate(r#"tags contains "rust""#, &ctx));
    }

    #[test]
    fn test_nested_paths_and_truthiness() {
        let ctx = data(json!({ "review": { "approved": true, "notes": "" }, "items": [1, 2] }));
        assert!(evaluate("review.approved", &ctx));
        assert!(!evaluate("review.notes", &ctx));
        assert!(evaluate("!review.notes", &ctx));
        assert!(evaluate("items.1 == 2", &ctx));
        assert!(!evaluate("missing", &ctx));
    }

    #[test]
    fn test_literals_and_garbage() {
        let ctx = DataMap::new();
        assert!(evaluate("true", &ctx));
        assert!(!evaluate("false", &ctx));
        assert!(!evaluate("", &ctx));
        assert!(!evaluate("this is not valid", &ctx));
    }
}
