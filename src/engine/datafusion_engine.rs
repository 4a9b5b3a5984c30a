//! Apache DataFusion backed engine.
//!
//! Relations become a single Arrow record batch in a `MemTable`; results come
//! back through `ScalarValue`. DataFusion is async, so the engine owns a Tokio
//! runtime and every call blocks on it. Calling into the engine from inside
//! another Tokio runtime is not supported.
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use datafusion::arrow::array::{
    Array, ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringArray, StringBuilder,
    TimestampMicrosecondBuilder,
};
use datafusion::arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use datafusion::arrow::record_batch::{RecordBatch, RecordBatchOptions};
use datafusion::common::cast::as_string_array;
use datafusion::common::{DataFusionError, Result as DFResult, ScalarValue, TableReference};
use datafusion::datasource::MemTable;
use datafusion::logical_expr::{create_udf, ColumnarValue, ScalarUDF, Volatility};
use datafusion::prelude::{SessionConfig, SessionContext};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

use super::{AnalyticalEngine, EngineOutput, EngineSession};
use crate::config::EngineConfig;
use crate::error::{QueryError, Result};
use crate::relation::{extract_json_path, Column, ColumnKind, Relation, Value};

pub struct DataFusionEngine {
    runtime: Runtime,
    target_partitions: usize,
}

impl DataFusionEngine {
    pub fn new(worker_threads: usize, target_partitions: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("framesql-engine")
            .enable_all()
            .build()
            .map_err(QueryError::engine)?;
        Ok(Self {
            runtime,
            target_partitions: target_partitions.max(1),
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(config.worker_threads, config.target_partitions)
    }
}

impl AnalyticalEngine for DataFusionEngine {
    type Session = DataFusionSession;

    fn open_session(&self) -> Result<DataFusionSession> {
        let config = SessionConfig::new().with_target_partitions(self.target_partitions);
        let ctx = SessionContext::new_with_config(config);
        ctx.register_udf(json_extract_udf());
        Ok(DataFusionSession {
            ctx,
            handle: self.runtime.handle().clone(),
            closed: false,
        })
    }
}

pub struct DataFusionSession {
    ctx: SessionContext,
    handle: Handle,
    closed: bool,
}

impl DataFusionSession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(QueryError::engine("engine session is closed"));
        }
        Ok(())
    }
}

impl EngineSession for DataFusionSession {
    fn register(&mut self, name: &str, relation: Relation) -> Result<()> {
        self.ensure_open()?;
        let batch = relation_to_batch(&relation)?;
        let table = MemTable::try_new(batch.schema(), vec![vec![batch]]).map_err(QueryError::engine)?;
        self.ctx
            .register_table(TableReference::bare(name.to_string()), Arc::new(table))
            .map_err(QueryError::engine)?;
        debug!(table = %name, rows = relation.num_rows(), "registered relation");
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<EngineOutput> {
        self.ensure_open()?;
        let ctx = self.ctx.clone();
        let sql = sql.to_string();
        let (fields, batches) = self
            .handle
            .block_on(async move {
                let df = ctx.sql(&sql).await?;
                let fields: Vec<(String, DataType)> = df
                    .schema()
                    .fields()
                    .iter()
                    .map(|f| (f.name().clone(), f.data_type().clone()))
                    .collect();
                let batches = df.collect().await?;
                Ok::<_, DataFusionError>((fields, batches))
            })
            .map_err(QueryError::engine)?;

        let labels: Vec<String> = fields.iter().map(|(name, _)| name.clone()).collect();
        let relation = batches_to_relation(&fields, &batches)?;
        Ok(EngineOutput { labels, relation })
    }

    fn unregister(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.ctx
            .deregister_table(TableReference::bare(name.to_string()))
            .map_err(QueryError::engine)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// `json_extract(document, path)` over JSON text, returning JSON text.
fn json_extract_udf() -> ScalarUDF {
    create_udf(
        "json_extract",
        vec![DataType::Utf8, DataType::Utf8],
        DataType::Utf8,
        Volatility::Immutable,
        Arc::new(json_extract),
    )
}

fn json_extract(args: &[ColumnarValue]) -> DFResult<ColumnarValue> {
    let arrays = ColumnarValue::values_to_arrays(args)?;
    let documents = as_string_array(arrays[0].as_ref())?;
    let paths = as_string_array(arrays[1].as_ref())?;
    let extracted: StringArray = documents
        .iter()
        .zip(paths.iter())
        .map(|(document, path)| match (document, path) {
            (Some(document), Some(path)) => extract_json_path(document, path),
            _ => None,
        })
        .collect();
    Ok(ColumnarValue::Array(Arc::new(extracted)))
}

fn data_type_for(kind: ColumnKind) -> DataType {
    match kind {
        ColumnKind::Bool => DataType::Boolean,
        ColumnKind::Int => DataType::Int64,
        ColumnKind::Float => DataType::Float64,
        ColumnKind::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        ColumnKind::Text | ColumnKind::Generic => DataType::Utf8,
    }
}

fn kind_for(data_type: &DataType) -> ColumnKind {
    match data_type {
        DataType::Boolean => ColumnKind::Bool,
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => ColumnKind::Int,
        DataType::Float16
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => ColumnKind::Float,
        DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64 => ColumnKind::Timestamp,
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => ColumnKind::Text,
        _ => ColumnKind::Generic,
    }
}

fn type_mismatch(column: &Column, value: &Value) -> QueryError {
    QueryError::InvalidRelation(format!(
        "column '{}' of kind {} holds incompatible value {}",
        column.name,
        column.kind,
        value.display()
    ))
}

fn column_to_array(column: &Column) -> Result<ArrayRef> {
    let array: ArrayRef = match column.kind {
        ColumnKind::Bool => {
            let mut builder = BooleanBuilder::with_capacity(column.len());
            for value in &column.values {
                match value {
                    Value::Bool(b) => builder.append_value(*b),
                    Value::Null => builder.append_null(),
                    other => return Err(type_mismatch(column, other)),
                }
            }
            Arc::new(builder.finish())
        }
        ColumnKind::Int => {
            let mut builder = Int64Builder::with_capacity(column.len());
            for value in &column.values {
                match value {
                    Value::Int(i) => builder.append_value(*i),
                    Value::Null => builder.append_null(),
                    other => return Err(type_mismatch(column, other)),
                }
            }
            Arc::new(builder.finish())
        }
        ColumnKind::Float => {
            let mut builder = Float64Builder::with_capacity(column.len());
            for value in &column.values {
                match value {
                    Value::Float(f) => builder.append_value(*f),
                    Value::Int(i) => builder.append_value(*i as f64),
                    Value::Null => builder.append_null(),
                    other => return Err(type_mismatch(column, other)),
                }
            }
            Arc::new(builder.finish())
        }
        ColumnKind::Timestamp => {
            let mut builder = TimestampMicrosecondBuilder::with_capacity(column.len());
            for value in &column.values {
                match value {
                    Value::Timestamp(ts) => builder.append_value(ts.and_utc().timestamp_micros()),
                    Value::Null => builder.append_null(),
                    other => return Err(type_mismatch(column, other)),
                }
            }
            Arc::new(builder.finish())
        }
        ColumnKind::Text | ColumnKind::Generic => {
            let mut builder = StringBuilder::new();
            for value in &column.values {
                match value.to_text() {
                    Some(text) => builder.append_value(text),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
    };
    Ok(array)
}

fn relation_to_batch(relation: &Relation) -> Result<RecordBatch> {
    let fields: Vec<Field> = relation
        .columns()
        .iter()
        .map(|c| Field::new(c.name.as_str(), data_type_for(c.kind), true))
        .collect();
    let schema = Arc::new(Schema::new(fields));
    let arrays = relation
        .columns()
        .iter()
        .map(column_to_array)
        .collect::<Result<Vec<_>>>()?;
    let options = RecordBatchOptions::new().with_row_count(Some(relation.num_rows()));
    RecordBatch::try_new_with_options(schema, arrays, &options).map_err(QueryError::engine)
}

fn batches_to_relation(fields: &[(String, DataType)], batches: &[RecordBatch]) -> Result<Relation> {
    let mut columns: Vec<Column> = fields
        .iter()
        .map(|(name, data_type)| Column::new(name.clone(), kind_for(data_type), Vec::new()))
        .collect();

    for batch in batches {
        for (index, column) in columns.iter_mut().enumerate() {
            let array = batch.column(index);
            column.values.reserve(array.len());
            for row in 0..array.len() {
                let scalar =
                    ScalarValue::try_from_array(array.as_ref(), row).map_err(QueryError::engine)?;
                column.values.push(scalar_to_value(scalar));
            }
        }
    }

    Relation::new(columns).map_err(QueryError::engine)
}

fn timestamp_from_nanos(nanos: i64) -> Option<NaiveDateTime> {
    let secs = nanos.div_euclid(1_000_000_000);
    let sub = nanos.rem_euclid(1_000_000_000) as u32;
    DateTime::from_timestamp(secs, sub).map(|dt| dt.naive_utc())
}

fn scalar_to_value(scalar: ScalarValue) -> Value {
    if scalar.is_null() {
        return Value::Null;
    }
    let timestamp = |nanos: Option<i64>| {
        nanos
            .and_then(timestamp_from_nanos)
            .map(Value::Timestamp)
            .unwrap_or(Value::Null)
    };
    match scalar {
        ScalarValue::Boolean(Some(b)) => Value::Bool(b),
        ScalarValue::Int8(Some(v)) => Value::Int(v.into()),
        ScalarValue::Int16(Some(v)) => Value::Int(v.into()),
        ScalarValue::Int32(Some(v)) => Value::Int(v.into()),
        ScalarValue::Int64(Some(v)) => Value::Int(v),
        ScalarValue::UInt8(Some(v)) => Value::Int(v.into()),
        ScalarValue::UInt16(Some(v)) => Value::Int(v.into()),
        ScalarValue::UInt32(Some(v)) => Value::Int(v.into()),
        ScalarValue::UInt64(Some(v)) => match i64::try_from(v) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Float(v as f64),
        },
        ScalarValue::Float32(Some(v)) => Value::Float(v.into()),
        ScalarValue::Float64(Some(v)) => Value::Float(v),
        ScalarValue::Decimal128(Some(v), _, scale) => {
            Value::Float(v as f64 / 10f64.powi(i32::from(scale)))
        }
        ScalarValue::Utf8(Some(s))
        | ScalarValue::LargeUtf8(Some(s))
        | ScalarValue::Utf8View(Some(s)) => Value::Text(s),
        ScalarValue::TimestampSecond(v, _) => timestamp(v.and_then(|s| s.checked_mul(1_000_000_000))),
        ScalarValue::TimestampMillisecond(v, _) => timestamp(v.and_then(|s| s.checked_mul(1_000_000))),
        ScalarValue::TimestampMicrosecond(v, _) => timestamp(v.and_then(|s| s.checked_mul(1_000))),
        ScalarValue::TimestampNanosecond(v, _) => timestamp(v),
        ScalarValue::Date32(Some(days)) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(days.into())))
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(Value::Timestamp)
            .unwrap_or(Value::Null),
        ScalarValue::Date64(v) => timestamp(v.and_then(|ms| ms.checked_mul(1_000_000))),
        other => Value::Text(other.to_string()),
    }
}
