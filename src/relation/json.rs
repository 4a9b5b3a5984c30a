//! JSON-bearing column handling.
//!
//! The engine cannot consume nested values, so columns read through
//! `JSON_EXTRACT` are flattened to their JSON text before registration.
//! The same text is what the engine's `json_extract` function navigates.
use std::collections::BTreeSet;

use tracing::debug;

use super::{Column, Relation, Value};

/// Replace structured values in the named columns with their compact JSON
/// text. Scalars pass through; names missing from the relation are ignored.
pub fn encode_json_columns(relation: Relation, json_columns: &BTreeSet<String>) -> Relation {
    if json_columns.is_empty() {
        return relation;
    }
    relation.map_columns(|column| {
        if json_columns.contains(&column.name) {
            encode_column(column)
        } else {
            column
        }
    })
}

fn encode_column(column: Column) -> Column {
    let name = column.name;
    let values = column
        .values
        .into_iter()
        .map(|value| match value {
            Value::Json(inner) => match serde_json::to_string(&inner) {
                Ok(text) => Value::Text(text),
                Err(err) => {
                    debug!(column = %name, error = %err, "leaving value unencoded");
                    Value::Json(inner)
                }
            },
            scalar => scalar,
        })
        .collect();
    Column {
        name,
        kind: column.kind,
        values,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PathStep {
    Key(String),
    Index(usize),
}

/// Parse a JSON path of the form `$`, `$.key`, `$."quoted key"`, `$[0]`.
fn parse_path(path: &str) -> Option<Vec<PathStep>> {
    let mut chars = path.trim().chars().peekable();
    if chars.next() != Some('$') {
        return None;
    }

    let mut steps = Vec::new();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    let mut key = String::new();
                    loop {
                        match chars.next()? {
                            '"' => break,
                            '\\' => key.push(chars.next()?),
                            other => key.push(other),
                        }
                    }
                    steps.push(PathStep::Key(key));
                } else {
                    let mut key = String::new();
                    while let Some(&next) = chars.peek() {
                        if next == '.' || next == '[' {
                            break;
                        }
                        key.push(next);
                        chars.next();
                    }
                    if key.is_empty() || key == "*" {
                        return None;
                    }
                    steps.push(PathStep::Key(key));
                }
            }
            '[' => {
                let mut digits = String::new();
                loop {
                    match chars.next()? {
                        ']' => break,
                        d => digits.push(d),
                    }
                }
                steps.push(PathStep::Index(digits.trim().parse().ok()?));
            }
            c if c.is_whitespace() => {}
            _ => return None,
        }
    }
    Some(steps)
}

/// Evaluate a JSON path against a JSON document, returning the selected
/// value as JSON text. `None` when the document or path is invalid or the
/// path selects nothing.
pub fn extract_json_path(document: &str, path: &str) -> Option<String> {
    let steps = parse_path(path)?;
    let root: serde_json::Value = serde_json::from_str(document).ok()?;

    let mut current = &root;
    for step in &steps {
        current = match step {
            PathStep::Key(key) => current.as_object()?.get(key)?,
            PathStep::Index(i) => current.as_array()?.get(*i)?,
        };
    }
    Some(current.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::ColumnKind;
    use serde_json::json;

    #[test]
    fn test_encodes_only_structured_values() {
        let rel = Relation::from_json_records(&json!([
            {"payload": [1, 2], "other": {"k": 1}},
            {"payload": 5, "other": null},
            {"payload": {"a": "b"}, "other": [3]}
        ]))
        .unwrap();
        let columns: BTreeSet<String> = ["payload".to_string()].into_iter().collect();
        let encoded = encode_json_columns(rel, &columns);

        let payload = encoded.column("payload").unwrap();
        assert_eq!(payload.values[0], Value::Text("[1,2]".into()));
        assert_eq!(payload.values[1], Value::Int(5));
        assert_eq!(payload.values[2], Value::Text("{\"a\":\"b\"}".into()));
        assert_eq!(payload.kind, ColumnKind::Generic);

        // Untouched column keeps its structured values
        let other = encoded.column("other").unwrap();
        assert_eq!(other.values[0], Value::Json(json!({"k": 1})));
    }

    #[test]
    fn test_missing_columns_ignored() {
        let rel = Relation::from_json_records(&json!([{"a": 1}])).unwrap();
        let columns: BTreeSet<String> = ["nope".to_string()].into_iter().collect();
        let encoded = encode_json_columns(rel.clone(), &columns);
        assert_eq!(encoded, rel);
    }

    #[test]
    fn test_extract_json_path() {
        let doc = r#"{"a": {"b": [10, {"c": "x"}]}, "odd key": true}"#;
        assert_eq!(extract_json_path(doc, "$.a.b[0]"), Some("10".into()));
        assert_eq!(extract_json_path(doc, "$.a.b[1].c"), Some("\"x\"".into()));
        assert_eq!(extract_json_path(doc, "$.\"odd key\""), Some("true".into()));
        assert_eq!(
            extract_json_path(doc, "$.a"),
            Some("{\"b\":[10,{\"c\":\"x\"}]}".into())
        );
        assert_eq!(extract_json_path("[1,2]", "$"), Some("[1,2]".into()));
    }

    #[test]
    fn test_extract_json_path_misses() {
        let doc = r#"{"a": [1]}"#;
        assert_eq!(extract_json_path(doc, "$.b"), None);
        assert_eq!(extract_json_path(doc, "$.a[3]"), None);
        assert_eq!(extract_json_path(doc, "a"), None);
        assert_eq!(extract_json_path(doc, "$.*"), None);
        assert_eq!(extract_json_path("not json", "$"), None);
    }
}
