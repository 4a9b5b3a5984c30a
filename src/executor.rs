//! Query execution over an in-memory relation.
//!
//! The executor ties the pieces together: the query is rewritten against the
//! internal table alias, the relation is prepared for the engine (JSON
//! columns flattened, known text columns forced, untyped columns normalized),
//! the rewritten query is rendered, and the engine runs it inside a scoped
//! session. Result columns are then relabelled to the names the caller asked
//! for, since the engine is free to label them however it likes.
use std::collections::BTreeSet;

use tracing::debug;

use crate::ast::compiler::{display_expr, render_with_fallback};
use crate::ast::parser::{parse_single_with, SourceDialect};
use crate::ast::rewriter::Rewriter;
use crate::ast::types::{Expression, Query, SelectItem};
use crate::config::{AdapterConfig, QueryConfig};
use crate::engine::{AnalyticalEngine, DataFusionEngine, ScopedSession};
use crate::error::{QueryError, Result};
use crate::relation::{encode_json_columns, Column, Relation, TypeNormalizer, Value};
use crate::session::QuerySession;

/// Catalog tables whose options column carries heterogeneous nested values.
const TEXT_WORKAROUND_TABLES: &[&str] = &["models", "predictors", "models_versions"];
const TEXT_WORKAROUND_COLUMN: &str = "TRAINING_OPTIONS";

/// Whether `table` gets its options column forced to text before
/// normalization.
pub fn needs_text_workaround(table: &str) -> bool {
    TEXT_WORKAROUND_TABLES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(table))
}

/// Everything that can be decided about a query without touching data.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    /// Engine SQL over the internal alias.
    pub sql: String,
    /// Table name as written by the caller.
    pub table_name: String,
    pub json_columns: BTreeSet<String>,
    /// Labels the result columns will carry, in projection order.
    pub output_names: Vec<String>,
}

pub struct QueryExecutor<E: AnalyticalEngine> {
    engine: E,
    config: QueryConfig,
}

impl QueryExecutor<DataFusionEngine> {
    /// Executor backed by DataFusion, configured from `config`.
    pub fn from_config(config: &AdapterConfig) -> Result<Self> {
        config.validate()?;
        let engine = DataFusionEngine::from_config(&config.engine)?;
        Ok(Self::with_config(engine, config.query.clone()))
    }
}

impl<E: AnalyticalEngine> QueryExecutor<E> {
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, QueryConfig::default())
    }

    pub fn with_config(engine: E, config: QueryConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn dialect(&self) -> SourceDialect {
        self.config.dialect
    }

    /// Parse `sql` in the configured dialect and run it against `relation`.
    pub fn query_sql(
        &self,
        sql: &str,
        relation: Relation,
        session: Option<&QuerySession>,
    ) -> Result<Relation> {
        let query = parse_single_with(sql, self.config.dialect)?;
        self.query(&query, relation, session)
    }

    /// Rewrite, render and name-resolve `query` for a relation with the
    /// given column names. Fails before any engine interaction when the
    /// query is not a single-table SELECT.
    pub fn prepare(
        &self,
        query: &Query,
        columns: &[String],
        session: Option<&QuerySession>,
    ) -> Result<PreparedQuery> {
        let rewritten = Rewriter::new(self.config.table_alias.as_str())
            .with_session(session)
            .with_columns(columns.iter().cloned())
            .rewrite(query.clone())?;
        let output_names = output_names(query, columns)?;
        let sql = render_with_fallback(&rewritten.query)?;
        debug!(table = %rewritten.table_name, sql = %sql, "prepared query");

        Ok(PreparedQuery {
            sql,
            table_name: rewritten.table_name,
            json_columns: rewritten.json_columns,
            output_names,
        })
    }

    /// Run `query` against `relation`. The result's columns carry the names
    /// requested in the projection list.
    pub fn query(
        &self,
        query: &Query,
        relation: Relation,
        session: Option<&QuerySession>,
    ) -> Result<Relation> {
        let prepared = self.prepare(query, &relation.column_names(), session)?;

        let relation = encode_json_columns(relation, &prepared.json_columns);
        let relation = apply_text_workaround(&prepared.table_name, relation);
        let relation = TypeNormalizer::new(self.config.sample_size).normalize(relation);
        let descriptors = relation.descriptors(&prepared.json_columns);
        debug!(
            columns = %descriptors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            rows = relation.num_rows(),
            "registering relation"
        );

        let output = {
            let mut scoped =
                ScopedSession::open(&self.engine, &self.config.table_alias, relation)?;
            scoped.execute(&prepared.sql)?
        };
        debug!(labels = ?output.labels, "engine returned");

        replace_missing_values(output.relation).rename_columns(&prepared.output_names)
    }
}

/// Names the caller expects for each result column. Wildcards expand to the
/// relation's columns, plain column references keep the name as written,
/// aliases win, anything else is labelled by its own text.
fn output_names(query: &Query, columns: &[String]) -> Result<Vec<String>> {
    let select = match query {
        Query::Select(select) => select,
        other => {
            return Err(QueryError::Unsupported(format!(
                "expected a SELECT, got {:?}",
                other
            )))
        }
    };

    let mut names = Vec::with_capacity(select.projections.len());
    for item in &select.projections {
        match item {
            SelectItem::Wildcard | SelectItem::QualifiedWildcard(_) => {
                names.extend(columns.iter().cloned())
            }
            SelectItem::Expression {
                alias: Some(alias), ..
            } => names.push(alias.clone()),
            SelectItem::Expression {
                expr: Expression::Column { name, .. },
                alias: None,
            } => names.push(name.clone()),
            SelectItem::Expression { expr, alias: None } => names.push(display_expr(expr)),
        }
    }
    Ok(names)
}

fn apply_text_workaround(table: &str, relation: Relation) -> Relation {
    if relation.is_empty()
        || !needs_text_workaround(table)
        || !relation.has_column(TEXT_WORKAROUND_COLUMN)
    {
        return relation;
    }
    debug!(table = %table, column = TEXT_WORKAROUND_COLUMN, "forcing column to text");
    relation.map_column(TEXT_WORKAROUND_COLUMN, Column::into_text)
}

/// The engine reports missing floats as NaN; callers expect NULL.
fn replace_missing_values(relation: Relation) -> Relation {
    relation.map_columns(|mut column| {
        for value in column.values.iter_mut() {
            if matches!(value, Value::Float(f) if f.is_nan()) {
                *value = Value::Null;
            }
        }
        column
    })
}
