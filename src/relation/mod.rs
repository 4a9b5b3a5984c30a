//! In-memory column-oriented relations.
//!
//! A [`Relation`] is what callers hand to the executor and what they get back:
//! ordered, uniquely named columns of equal length. Columns carry a
//! [`ColumnKind`]; `Generic` marks untyped or mixed content that the type
//! normalizer is allowed to coerce.
pub mod json;
pub mod normalize;

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::NaiveDateTime;
use serde_json::{Map, Number};

use crate::error::{QueryError, Result};

pub use json::{encode_json_columns, extract_json_path};
pub use normalize::{TypeNormalizer, DEFAULT_SAMPLE_SIZE};

/// Format used when timestamps are turned into text.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    /// Structured (nested) value: an object or an array.
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text representation used when a column is handed to the engine as
    /// strings. `None` for nulls.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Timestamp(ts) => Some(ts.format(TIMESTAMP_FORMAT).to_string()),
            Value::Json(j) => Some(j.to_string()),
        }
    }

    pub fn display(&self) -> String {
        self.to_text().unwrap_or_else(|| "NULL".to_string())
    }

    pub fn display_width(&self) -> usize {
        unicode_width::UnicodeWidthStr::width(self.display().as_str())
    }

    /// Convert a JSON value. Nested objects and arrays stay structured.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Json(other),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(ts) => {
                serde_json::Value::String(ts.format(TIMESTAMP_FORMAT).to_string())
            }
            Value::Json(j) => j.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// Untyped or mixed values.
    Generic,
    Bool,
    Int,
    Float,
    Timestamp,
    Text,
}

impl ColumnKind {
    /// Infer the kind of a freshly built column. Only uniform scalar content
    /// gets a specific kind; text, structured and mixed values stay generic.
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        let mut kind: Option<ColumnKind> = None;
        for value in values {
            let current = match value {
                Value::Null => continue,
                Value::Bool(_) => ColumnKind::Bool,
                Value::Int(_) => ColumnKind::Int,
                Value::Float(_) => ColumnKind::Float,
                Value::Timestamp(_) => ColumnKind::Timestamp,
                Value::Text(_) | Value::Json(_) => return ColumnKind::Generic,
            };
            kind = match (kind, current) {
                (None, k) => Some(k),
                (Some(a), b) if a == b => Some(a),
                (Some(ColumnKind::Int), ColumnKind::Float)
                | (Some(ColumnKind::Float), ColumnKind::Int) => Some(ColumnKind::Float),
                _ => return ColumnKind::Generic,
            };
        }
        kind.unwrap_or(ColumnKind::Generic)
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnKind::Generic => "generic",
            ColumnKind::Bool => "bool",
            ColumnKind::Int => "int",
            ColumnKind::Float => "float",
            ColumnKind::Timestamp => "timestamp",
            ColumnKind::Text => "text",
        };
        write!(f, "{}", name)
    }
}

/// Per-call description of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub kind: ColumnKind,
    pub json: bool,
}

impl fmt::Display for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.kind)?;
        if self.json {
            write!(f, " (json)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            kind,
            values,
        }
    }

    /// Build a column whose kind is inferred from its values.
    pub fn from_values(name: impl Into<String>, values: Vec<Value>) -> Self {
        let kind = ColumnKind::infer(&values);
        Self::new(name, kind, values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Force every value to text, keeping nulls.
    pub fn into_text(self) -> Self {
        let values = self
            .values
            .into_iter()
            .map(|v| match v.to_text() {
                Some(s) => Value::Text(s),
                None => Value::Null,
            })
            .collect();
        Self::new(self.name, ColumnKind::Text, values)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Relation {
    columns: Vec<Column>,
    rows: usize,
}

impl Relation {
    /// Build a relation, checking that names are unique and lengths agree.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let rows = columns.first().map(Column::len).unwrap_or(0);
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(QueryError::InvalidRelation(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
            if column.len() != rows {
                return Err(QueryError::InvalidRelation(format!(
                    "column '{}' has {} rows, expected {}",
                    column.name,
                    column.len(),
                    rows
                )));
            }
        }
        Ok(Self { columns, rows })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a relation from a JSON array of objects. Column order follows
    /// first appearance; missing keys become nulls.
    pub fn from_json_records(records: &serde_json::Value) -> Result<Self> {
        let records = records.as_array().ok_or_else(|| {
            QueryError::InvalidRelation("expected a JSON array of records".into())
        })?;

        let mut names: Vec<String> = Vec::new();
        let mut index: HashSet<&str> = HashSet::new();
        for (i, record) in records.iter().enumerate() {
            let object = record.as_object().ok_or_else(|| {
                QueryError::InvalidRelation(format!("record {} is not a JSON object", i))
            })?;
            for key in object.keys() {
                if index.insert(key.as_str()) {
                    names.push(key.clone());
                }
            }
        }

        let columns = names
            .into_iter()
            .map(|name| {
                let values = records
                    .iter()
                    .map(|record| {
                        record
                            .get(&name)
                            .cloned()
                            .map(Value::from_json)
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                Column::from_values(name, values)
            })
            .collect();

        Self::new(columns)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let records: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| QueryError::InvalidRelation(format!("invalid JSON input: {}", e)))?;
        Self::from_json_records(&records)
    }

    pub fn to_json_records(&self) -> serde_json::Value {
        let records = (0..self.rows)
            .map(|row| {
                let mut object = Map::new();
                for column in &self.columns {
                    object.insert(column.name.clone(), column.values[row].to_json());
                }
                serde_json::Value::Object(object)
            })
            .collect();
        serde_json::Value::Array(records)
    }

    pub fn num_rows(&self) -> usize {
        self.rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Values of one row, in column order.
    pub fn row(&self, index: usize) -> Option<Vec<&Value>> {
        if index >= self.rows {
            return None;
        }
        Some(self.columns.iter().map(|c| &c.values[index]).collect())
    }

    /// New relation holding only the rows at `indices`, in that order.
    pub fn select_rows(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.rows) {
            return Err(QueryError::InvalidRelation(format!(
                "row {} out of range for {} rows",
                bad, self.rows
            )));
        }
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                kind: c.kind,
                values: indices.iter().map(|&i| c.values[i].clone()).collect(),
            })
            .collect();
        Ok(Self {
            columns,
            rows: indices.len(),
        })
    }

    /// Apply `f` to every column, keeping the relation shape.
    pub fn map_columns<F>(self, f: F) -> Self
    where
        F: FnMut(Column) -> Column,
    {
        let rows = self.rows;
        let columns = self.columns.into_iter().map(f).collect();
        Self { columns, rows }
    }

    /// Apply `f` to the named column only.
    pub fn map_column<F>(mut self, name: &str, f: F) -> Self
    where
        F: FnOnce(Column) -> Column,
    {
        if let Some(pos) = self.columns.iter().position(|c| c.name == name) {
            let column = self.columns.remove(pos);
            self.columns.insert(pos, f(column));
        }
        self
    }

    /// Rename columns positionally.
    pub fn rename_columns(self, names: &[String]) -> Result<Self> {
        if names.len() != self.columns.len() {
            return Err(QueryError::ColumnMismatch {
                expected: names.len(),
                actual: self.columns.len(),
            });
        }
        let columns = self
            .columns
            .into_iter()
            .zip(names)
            .map(|(column, name)| Column {
                name: name.clone(),
                ..column
            })
            .collect();
        Ok(Self {
            columns,
            rows: self.rows,
        })
    }

    /// Describe every column, flagging the JSON-bearing ones.
    pub fn descriptors(&self, json_columns: &BTreeSet<String>) -> Vec<ColumnDescriptor> {
        self.columns
            .iter()
            .map(|c| ColumnDescriptor {
                name: c.name.clone(),
                kind: c.kind,
                json: json_columns.contains(&c.name),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Relation {
        Relation::from_json_records(&json!([
            {"id": 1, "name": "a", "tags": ["x"]},
            {"id": 2, "name": "b"},
            {"id": 3, "name": "c", "score": 1.5}
        ]))
        .unwrap()
    }

    #[test]
    fn test_from_json_records_column_order_and_nulls() {
        let rel = sample();
        assert_eq!(rel.column_names(), vec!["id", "name", "tags", "score"]);
        assert_eq!(rel.num_rows(), 3);
        let tags = rel.column("tags").unwrap();
        assert_eq!(tags.values[0], Value::Json(json!(["x"])));
        assert_eq!(tags.values[1], Value::Null);
        assert_eq!(rel.column("score").unwrap().values[2], Value::Float(1.5));
    }

    #[test]
    fn test_kind_inference() {
        let rel = sample();
        assert_eq!(rel.column("id").unwrap().kind, ColumnKind::Int);
        assert_eq!(rel.column("name").unwrap().kind, ColumnKind::Generic);
        assert_eq!(rel.column("tags").unwrap().kind, ColumnKind::Generic);
        assert_eq!(rel.column("score").unwrap().kind, ColumnKind::Float);
        assert_eq!(
            ColumnKind::infer(&[Value::Int(1), Value::Float(2.0)]),
            ColumnKind::Float
        );
        assert_eq!(
            ColumnKind::infer(&[Value::Int(1), Value::Bool(true)]),
            ColumnKind::Generic
        );
        assert_eq!(ColumnKind::infer(&[Value::Null]), ColumnKind::Generic);
    }

    #[test]
    fn test_rejects_misaligned_columns() {
        let err = Relation::new(vec![
            Column::from_values("a", vec![Value::Int(1)]),
            Column::from_values("b", vec![]),
        ])
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidRelation(_)));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let err = Relation::new(vec![
            Column::from_values("a", vec![Value::Int(1)]),
            Column::from_values("a", vec![Value::Int(2)]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate column name 'a'"));
    }

    #[test]
    fn test_rejects_non_object_records() {
        assert!(Relation::from_json_records(&json!([1, 2])).is_err());
        assert!(Relation::from_json_records(&json!({"a": 1})).is_err());
        assert!(Relation::from_json_str("not json").is_err());
    }

    #[test]
    fn test_to_json_records() {
        let rel = Relation::from_json_records(&json!([{"a": 1, "b": null}])).unwrap();
        assert_eq!(rel.to_json_records(), json!([{"a": 1, "b": null}]));
    }

    #[test]
    fn test_rename_columns() {
        let rel = sample();
        let names: Vec<String> = ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
        let renamed = rel.clone().rename_columns(&names).unwrap();
        assert_eq!(renamed.column_names(), names);
        assert!(matches!(
            rel.rename_columns(&names[..2]),
            Err(QueryError::ColumnMismatch {
                expected: 2,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_select_rows() {
        let rel = sample();
        let picked = rel.select_rows(&[2, 0]).unwrap();
        assert_eq!(picked.num_rows(), 2);
        assert_eq!(
            picked.column("name").unwrap().values,
            vec![Value::Text("c".into()), Value::Text("a".into())]
        );
        assert_eq!(picked.column_names(), rel.column_names());
        assert!(rel.select_rows(&[]).unwrap().is_empty());
        assert!(matches!(
            rel.select_rows(&[3]),
            Err(QueryError::InvalidRelation(_))
        ));
    }

    #[test]
    fn test_map_column_only_touches_named_column() {
        let rel = sample().map_column("id", Column::into_text);
        assert_eq!(rel.column("id").unwrap().kind, ColumnKind::Text);
        assert_eq!(
            rel.column("id").unwrap().values[0],
            Value::Text("1".into())
        );
        assert_eq!(rel.column("score").unwrap().kind, ColumnKind::Float);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.display(), "NULL");
        assert_eq!(Value::Bool(true).display(), "true");
        assert_eq!(Value::Float(2.5).display(), "2.5");
        assert_eq!(Value::Json(json!({"a": [1]})).display(), "{\"a\":[1]}");
        let ts = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(Value::Timestamp(ts).display(), "2024-01-02 03:04:05");
        assert_eq!(Value::Text("日本".into()).display_width(), 4);
    }

    #[test]
    fn test_descriptors() {
        let json_columns: BTreeSet<String> = ["tags".to_string()].into_iter().collect();
        let descriptors = sample().descriptors(&json_columns);
        assert_eq!(descriptors.len(), 4);
        assert!(descriptors[2].json);
        assert!(!descriptors[0].json);
        assert_eq!(descriptors[0].kind, ColumnKind::Int);
        assert_eq!(descriptors[0].to_string(), "id:int");
        assert_eq!(descriptors[2].to_string(), "tags:generic (json)");
    }

    #[test]
    fn test_row_access() {
        let rel = sample();
        let row = rel.row(1).unwrap();
        assert_eq!(row[0], &Value::Int(2));
        assert!(rel.row(3).is_none());
    }
}
