//! Type normalization for untyped columns.
//!
//! Upstream sources often hand over columns of loosely typed values: numbers
//! as strings, dates as strings, or a mix. The engine needs one declared type
//! per column, so every `Generic` column is probed on a bounded sample and,
//! when the sample shows a better type than text, the whole column is coerced.
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::debug;

use super::{Column, ColumnKind, Relation, Value};

pub const DEFAULT_SAMPLE_SIZE: usize = 100;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

#[derive(Debug, Clone, Copy)]
pub struct TypeNormalizer {
    sample_size: usize,
}

impl Default for TypeNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_SIZE)
    }
}

impl TypeNormalizer {
    pub fn new(sample_size: usize) -> Self {
        Self {
            sample_size: sample_size.max(1),
        }
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn normalize(&self, relation: Relation) -> Relation {
        relation.map_columns(|column| self.normalize_column(column))
    }

    pub fn normalize_column(&self, column: Column) -> Column {
        if column.kind != ColumnKind::Generic || column.is_empty() {
            return column;
        }

        let sample: Vec<&Value> = sample_indices(column.len(), self.sample_size)
            .map(|i| &column.values[i])
            .collect();
        let sample_kind = infer_kind(sample.into_iter());
        if sample_kind == ColumnKind::Text {
            debug!(column = %column.name, "sample is textual, column left as is");
            return column;
        }

        let coerced = coerce_column(column);
        debug!(
            column = %coerced.name,
            sampled = %sample_kind,
            committed = %coerced.kind,
            "normalized column"
        );
        coerced
    }
}

/// Evenly spaced, deterministic sample positions.
fn sample_indices(len: usize, sample_size: usize) -> impl Iterator<Item = usize> {
    let n = sample_size.min(len);
    (0..n).map(move |i| i * len / n)
}

/// Inference order: float, timestamp, integer, then text.
fn infer_kind<'a>(values: impl Iterator<Item = &'a Value> + Clone) -> ColumnKind {
    if values.clone().all(|v| v.is_null() || to_float(v).is_some()) {
        ColumnKind::Float
    } else if values.clone().all(|v| v.is_null() || to_timestamp(v).is_some()) {
        ColumnKind::Timestamp
    } else if values.clone().all(|v| v.is_null() || to_int(v).is_some()) {
        ColumnKind::Int
    } else {
        ColumnKind::Text
    }
}

/// Run the inference cascade over a full column and commit the first branch
/// that converts every value. Text always succeeds.
fn coerce_column(column: Column) -> Column {
    if let Some(values) = convert_all(&column.values, |v| to_float(v).map(Value::Float)) {
        return Column::new(column.name, ColumnKind::Float, values);
    }
    if let Some(values) = convert_all(&column.values, |v| to_timestamp(v).map(Value::Timestamp)) {
        return Column::new(column.name, ColumnKind::Timestamp, values);
    }
    if let Some(values) = convert_all(&column.values, |v| to_int(v).map(Value::Int)) {
        return Column::new(column.name, ColumnKind::Int, values);
    }
    column.into_text()
}

fn convert_all<F>(values: &[Value], convert: F) -> Option<Vec<Value>>
where
    F: Fn(&Value) -> Option<Value>,
{
    values
        .iter()
        .map(|v| if v.is_null() { Some(Value::Null) } else { convert(v) })
        .collect()
}

fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) => Some(*f),
        Value::Int(i) => Some(*i as f64),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn to_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Timestamp(ts) => Some(*ts),
        Value::Text(s) => parse_timestamp(s.trim()),
        _ => None,
    }
}

pub(crate) fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}
