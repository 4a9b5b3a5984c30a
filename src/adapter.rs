/// Table adapters: named data sources queried through the executor.
///
/// An adapter produces a relation for a SELECT over its table, optionally
/// using the WHERE clause to fetch less. The registry then runs the whole
/// query over whatever the adapter returned, so pushdown only ever needs to
/// be a superset of the final answer.
use std::fmt;

use tracing::debug;

use crate::ast::analyze::analyze_query;
use crate::ast::compiler::{compile, display_expr};
use crate::ast::parser::parse_single_with;
use crate::ast::types::{
    BinaryOperator, Expression, Literal, Query, SelectQuery, TableRef, UnaryOperator,
};
use crate::engine::AnalyticalEngine;
use crate::error::{QueryError, Result};
use crate::executor::QueryExecutor;
use crate::relation::{Column, ColumnKind, Relation, Value};
use crate::session::QuerySession;

/// A queryable table backed by some data source.
pub trait TableAdapter: Send + Sync {
    /// Table name as used in FROM clauses.
    fn name(&self) -> &str;

    fn columns(&self) -> Vec<String>;

    /// Produce the rows for `query`. May filter using the WHERE clause but
    /// must not drop rows the clause would keep.
    fn fetch(&self, query: &SelectQuery) -> Result<Relation>;
}

/// Routes single-table SELECTs to the adapter named in FROM.
pub struct TableRegistry<E: AnalyticalEngine> {
    executor: QueryExecutor<E>,
    tables: Vec<Box<dyn TableAdapter>>,
}

impl<E: AnalyticalEngine> TableRegistry<E> {
    pub fn new(executor: QueryExecutor<E>) -> Self {
        Self {
            executor,
            tables: Vec::new(),
        }
    }

    /// Register an adapter, replacing any with the same name.
    pub fn register(&mut self, table: Box<dyn TableAdapter>) {
        self.tables
            .retain(|existing| !existing.name().eq_ignore_ascii_case(table.name()));
        debug!(table = %table.name(), "registered table adapter");
        self.tables.push(table);
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name()).collect()
    }

    /// Look up an adapter by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&dyn TableAdapter> {
        self.tables
            .iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
            .map(|t| t.as_ref())
    }

    pub fn executor(&self) -> &QueryExecutor<E> {
        &self.executor
    }

    pub fn select(&self, sql: &str, session: Option<&QuerySession>) -> Result<Relation> {
        let query = parse_single_with(sql, self.executor.dialect())?;
        self.select_query(&query, session)
    }

    pub fn select_query(&self, query: &Query, session: Option<&QuerySession>) -> Result<Relation> {
        let analysis = analyze_query(query);
        let select = match query {
            Query::Select(select) if analysis.is_single_table_select() => select,
            _ => {
                return Err(QueryError::Unsupported(format!(
                    "{} in `{}`",
                    analysis.violations().join(", "),
                    compile(query)
                )))
            }
        };
        let name = match select.from.first() {
            Some(TableRef::Table { name, .. }) => name,
            _ => {
                return Err(QueryError::Unsupported(
                    "expected a plain table reference in FROM".into(),
                ))
            }
        };
        let table = self
            .get(name)
            .ok_or_else(|| QueryError::UnknownTable(name.clone()))?;

        let relation = table.fetch(select)?;
        debug!(table = %name, rows = relation.num_rows(), "fetched rows");
        self.executor.query(query, relation, session)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl ConditionOp {
    fn from_binary(op: &BinaryOperator) -> Option<Self> {
        Some(match op {
            BinaryOperator::Eq => ConditionOp::Eq,
            BinaryOperator::NotEq => ConditionOp::NotEq,
            BinaryOperator::Lt => ConditionOp::Lt,
            BinaryOperator::LtEq => ConditionOp::LtEq,
            BinaryOperator::Gt => ConditionOp::Gt,
            BinaryOperator::GtEq => ConditionOp::GtEq,
            BinaryOperator::Like => ConditionOp::Like,
            BinaryOperator::NotLike => ConditionOp::NotLike,
            _ => return None,
        })
    }

    /// The operator with its operands swapped, if it has one.
    fn flipped(self) -> Option<Self> {
        Some(match self {
            ConditionOp::Eq => ConditionOp::Eq,
            ConditionOp::NotEq => ConditionOp::NotEq,
            ConditionOp::Lt => ConditionOp::Gt,
            ConditionOp::LtEq => ConditionOp::GtEq,
            ConditionOp::Gt => ConditionOp::Lt,
            ConditionOp::GtEq => ConditionOp::LtEq,
            _ => return None,
        })
    }
}

impl fmt::Display for ConditionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            ConditionOp::Eq => "=",
            ConditionOp::NotEq => "<>",
            ConditionOp::Lt => "<",
            ConditionOp::LtEq => "<=",
            ConditionOp::Gt => ">",
            ConditionOp::GtEq => ">=",
            ConditionOp::Like => "LIKE",
            ConditionOp::NotLike => "NOT LIKE",
            ConditionOp::In => "IN",
            ConditionOp::NotIn => "NOT IN",
            ConditionOp::IsNull => "IS NULL",
            ConditionOp::IsNotNull => "IS NOT NULL",
        };
        write!(f, "{}", symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    None,
    Single(Value),
    List(Vec<Value>),
}

/// One `column op value` test from a WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub op: ConditionOp,
    pub column: String,
    pub value: ConditionValue,
}

impl Condition {
    fn new(op: ConditionOp, column: &str, value: ConditionValue) -> Self {
        Self {
            op,
            column: column.to_string(),
            value,
        }
    }
}

/// Flatten a conjunctive WHERE clause into simple conditions. `OR` and
/// anything that is not a column compared with literals is rejected.
pub fn extract_comparison_conditions(filter: Option<&Expression>) -> Result<Vec<Condition>> {
    let mut conditions = Vec::new();
    if let Some(expr) = filter {
        collect_conditions(expr, &mut conditions)?;
    }
    Ok(conditions)
}

fn collect_conditions(expr: &Expression, out: &mut Vec<Condition>) -> Result<()> {
    match expr {
        Expression::Nested(inner) => collect_conditions(inner, out),
        Expression::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_conditions(left, out)?;
            collect_conditions(right, out)
        }
        Expression::BinaryOp {
            op: BinaryOperator::Or,
            ..
        } => Err(QueryError::Adapter(format!(
            "OR is not supported in conditions: {}",
            display_expr(expr)
        ))),
        Expression::BinaryOp { left, op, right } => {
            let op = ConditionOp::from_binary(op).ok_or_else(|| unsupported(expr))?;
            if let (Some(column), Some(value)) = (column_name(left), literal_value(right)) {
                out.push(Condition::new(op, column, ConditionValue::Single(value)));
                return Ok(());
            }
            if let (Some(value), Some(column)) = (literal_value(left), column_name(right)) {
                let op = op.flipped().ok_or_else(|| unsupported(expr))?;
                out.push(Condition::new(op, column, ConditionValue::Single(value)));
                return Ok(());
            }
            Err(unsupported(expr))
        }
        Expression::InList {
            expr: target,
            list,
            negated,
        } => {
            let column = column_name(target).ok_or_else(|| unsupported(expr))?;
            let values = list
                .iter()
                .map(|item| literal_value(item).ok_or_else(|| unsupported(expr)))
                .collect::<Result<Vec<_>>>()?;
            let op = if *negated {
                ConditionOp::NotIn
            } else {
                ConditionOp::In
            };
            out.push(Condition::new(op, column, ConditionValue::List(values)));
            Ok(())
        }
        Expression::Between {
            expr: target,
            low,
            high,
            negated: false,
        } => {
            let column = column_name(target).ok_or_else(|| unsupported(expr))?;
            let low = literal_value(low).ok_or_else(|| unsupported(expr))?;
            let high = literal_value(high).ok_or_else(|| unsupported(expr))?;
            out.push(Condition::new(ConditionOp::GtEq, column, ConditionValue::Single(low)));
            out.push(Condition::new(ConditionOp::LtEq, column, ConditionValue::Single(high)));
            Ok(())
        }
        Expression::IsNull {
            expr: target,
            negated,
        } => {
            let column = column_name(target).ok_or_else(|| unsupported(expr))?;
            let op = if *negated {
                ConditionOp::IsNotNull
            } else {
                ConditionOp::IsNull
            };
            out.push(Condition::new(op, column, ConditionValue::None));
            Ok(())
        }
        other => Err(unsupported(other)),
    }
}

fn unsupported(expr: &Expression) -> QueryError {
    QueryError::Adapter(format!("unsupported condition: {}", display_expr(expr)))
}

fn column_name(expr: &Expression) -> Option<&str> {
    match expr {
        Expression::Column { name, .. } => Some(name.as_str()),
        Expression::Nested(inner) => column_name(inner),
        _ => None,
    }
}

fn literal_value(expr: &Expression) -> Option<Value> {
    match expr {
        Expression::Literal(lit) => Some(match lit {
            Literal::Null => Value::Null,
            Literal::Boolean(b) => Value::Bool(*b),
            Literal::Integer(i) => Value::Int(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::String(s) => Value::Text(s.clone()),
        }),
        Expression::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal_value(expr)? {
            Value::Int(i) => Some(Value::Int(i.checked_neg()?)),
            Value::Float(f) => Some(Value::Float(-f)),
            _ => None,
        },
        Expression::Nested(inner) => literal_value(inner),
        _ => None,
    }
}

/// Adapter over an owned relation. Equality conditions on typed columns are
/// applied while fetching; everything else is left to the executor, and a
/// filter that cannot be flattened fetches the whole relation.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    name: String,
    relation: Relation,
}

impl MemoryTable {
    pub fn new(name: impl Into<String>, relation: Relation) -> Self {
        Self {
            name: name.into(),
            relation,
        }
    }

    pub fn relation(&self) -> &Relation {
        &self.relation
    }

    fn find_column(&self, name: &str) -> Result<&Column> {
        self.relation
            .column(name)
            .or_else(|| {
                self.relation
                    .columns()
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(name))
            })
            .ok_or_else(|| {
                QueryError::Adapter(format!("table '{}' has no column '{}'", self.name, name))
            })
    }
}

impl TableAdapter for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn columns(&self) -> Vec<String> {
        self.relation.column_names()
    }

    fn fetch(&self, query: &SelectQuery) -> Result<Relation> {
        let conditions = match extract_comparison_conditions(query.filter.as_ref()) {
            Ok(conditions) => conditions,
            Err(err) => {
                debug!(table = %self.name, error = %err, "no pushdown for filter");
                return Ok(self.relation.clone());
            }
        };
        let mut equalities = Vec::new();
        for condition in &conditions {
            if let (ConditionOp::Eq, ConditionValue::Single(value)) =
                (condition.op, &condition.value)
            {
                let column = self.find_column(&condition.column)?;
                if comparable_as_stored(column.kind, value) {
                    equalities.push((column, value));
                }
            }
        }
        if equalities.is_empty() {
            return Ok(self.relation.clone());
        }

        let keep: Vec<usize> = (0..self.relation.num_rows())
            .filter(|&row| {
                equalities
                    .iter()
                    .all(|(column, value)| values_equal(&column.values[row], value))
            })
            .collect();
        debug!(
            table = %self.name,
            kept = keep.len(),
            total = self.relation.num_rows(),
            "pushed down equality conditions"
        );
        self.relation.select_rows(&keep)
    }
}

/// Whether comparing stored values with `literal` gives the same answer as
/// the executor, which compares after type normalization. Generic and
/// timestamp columns change representation on the way in, so they are
/// never filtered here.
fn comparable_as_stored(kind: ColumnKind, literal: &Value) -> bool {
    matches!(
        (kind, literal),
        (ColumnKind::Int | ColumnKind::Float, Value::Int(_) | Value::Float(_))
            | (ColumnKind::Bool, Value::Bool(_))
            | (ColumnKind::Text, Value::Text(_))
    )
}

/// SQL-style equality: NULL matches nothing, numbers compare by value and
/// everything else by its text.
fn values_equal(left: &Value, right: &Value) -> bool {
    if left.is_null() || right.is_null() {
        return false;
    }
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l == r,
        _ => left.to_text() == right.to_text(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parser::parse_single;
    use crate::config::AdapterConfig;
    use crate::engine::testing::RecordingEngine;
    use crate::engine::DataFusionEngine;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn filter_of(sql: &str) -> Option<Expression> {
        match parse_single(sql).unwrap() {
            Query::Select(select) => select.filter,
            other => panic!("expected select, got {:?}", other),
        }
    }

    fn stories() -> Relation {
        Relation::from_json_records(&json!([
            {"id": 1, "title": "a", "score": 10},
            {"id": 2, "title": "b", "score": 20},
            {"id": 3, "title": "c", "score": 30}
        ]))
        .unwrap()
    }

    fn registry() -> TableRegistry<DataFusionEngine> {
        let executor = QueryExecutor::from_config(&AdapterConfig::default()).unwrap();
        let mut registry = TableRegistry::new(executor);
        registry.register(Box::new(MemoryTable::new("stories", stories())));
        registry
    }

    #[test]
    fn test_extract_conditions() {
        let filter = filter_of(
            "SELECT * FROM t WHERE a = 1 AND 5 < b AND c IN (1, 'x') \
             AND d BETWEEN 1 AND 5 AND e IS NOT NULL AND (f LIKE 'x%') AND g = -2",
        );
        let conditions = extract_comparison_conditions(filter.as_ref()).unwrap();
        let summary: Vec<(String, &str)> = conditions
            .iter()
            .map(|c| (c.op.to_string(), c.column.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("=".to_string(), "a"),
                (">".to_string(), "b"),
                ("IN".to_string(), "c"),
                (">=".to_string(), "d"),
                ("<=".to_string(), "d"),
                ("IS NOT NULL".to_string(), "e"),
                ("LIKE".to_string(), "f"),
                ("=".to_string(), "g"),
            ]
        );
        assert_eq!(conditions[1].value, ConditionValue::Single(Value::Int(5)));
        assert_eq!(
            conditions[2].value,
            ConditionValue::List(vec![Value::Int(1), Value::Text("x".into())])
        );
        assert_eq!(conditions[5].value, ConditionValue::None);
        assert_eq!(conditions[7].value, ConditionValue::Single(Value::Int(-2)));
    }

    #[test]
    fn test_extract_conditions_without_where() {
        assert!(extract_comparison_conditions(None).unwrap().is_empty());
    }

    #[test]
    fn test_extract_conditions_rejects_or() {
        let filter = filter_of("SELECT * FROM t WHERE a = 1 OR b = 2");
        let err = extract_comparison_conditions(filter.as_ref()).unwrap_err();
        assert!(matches!(err, QueryError::Adapter(ref msg) if msg.contains("OR")));
    }

    #[test]
    fn test_extract_conditions_rejects_non_literal_comparisons() {
        for sql in [
            "SELECT * FROM t WHERE a = b",
            "SELECT * FROM t WHERE a + 1 = 2",
            "SELECT * FROM t WHERE 'x%' LIKE a",
            "SELECT * FROM t WHERE a NOT BETWEEN 1 AND 2",
        ] {
            let filter = filter_of(sql);
            assert!(
                extract_comparison_conditions(filter.as_ref()).is_err(),
                "{}",
                sql
            );
        }
    }

    #[test]
    fn test_memory_table_pushes_down_equality() {
        let table = MemoryTable::new("stories", stories());
        let query = match parse_single("SELECT * FROM stories WHERE id = 2 AND score > 1").unwrap()
        {
            Query::Select(select) => *select,
            _ => unreachable!(),
        };
        let fetched = table.fetch(&query).unwrap();
        assert_eq!(fetched.num_rows(), 1);
        assert_eq!(
            fetched.column("title").unwrap().values,
            vec![Value::Text("b".into())]
        );

        let query = match parse_single("SELECT * FROM stories WHERE nope = 1").unwrap() {
            Query::Select(select) => *select,
            _ => unreachable!(),
        };
        assert!(matches!(table.fetch(&query), Err(QueryError::Adapter(_))));
    }

    fn select_of(sql: &str) -> SelectQuery {
        match parse_single(sql).unwrap() {
            Query::Select(select) => *select,
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[test]
    fn test_memory_table_skips_generic_columns() {
        let table = MemoryTable::new("stories", stories());
        let fetched = table
            .fetch(&select_of("SELECT * FROM stories WHERE title = 'B'"))
            .unwrap();
        assert_eq!(fetched.num_rows(), 3);

        let fetched = table
            .fetch(&select_of("SELECT * FROM stories WHERE id = '2'"))
            .unwrap();
        assert_eq!(fetched.num_rows(), 3);
    }

    #[test]
    fn test_memory_table_fetches_all_for_complex_filters() {
        let table = MemoryTable::new("stories", stories());
        for sql in [
            "SELECT * FROM stories WHERE id = 1 OR id = 2",
            "SELECT * FROM stories WHERE UPPER(title) = 'A'",
            "SELECT * FROM stories WHERE id = 1 AND score + 1 = 11",
        ] {
            assert_eq!(table.fetch(&select_of(sql)).unwrap().num_rows(), 3, "{}", sql);
        }
    }

    #[test]
    fn test_registry_matches_direct_execution() {
        let dated = Relation::from_json_records(&json!([
            {"id": 1, "d": "2024-01-01"},
            {"id": 2, "d": "2024-01-02"}
        ]))
        .unwrap();
        let executor = QueryExecutor::from_config(&AdapterConfig::default()).unwrap();
        let mut registry = TableRegistry::new(executor);
        registry.register(Box::new(MemoryTable::new("events", dated.clone())));

        for sql in [
            "SELECT id FROM events WHERE d = '2024-01-01 00:00:00'",
            "SELECT id FROM events WHERE id = 1 OR id = 2 ORDER BY id",
            "SELECT id FROM events WHERE UPPER(CAST(id AS VARCHAR)) = '2'",
        ] {
            let routed = registry.select(sql, None).unwrap();
            let direct = registry
                .executor()
                .query_sql(sql, dated.clone(), None)
                .unwrap();
            assert_eq!(routed, direct, "{}", sql);
        }

        let routed = registry
            .select("SELECT id FROM events WHERE d = '2024-01-01 00:00:00'", None)
            .unwrap();
        assert_eq!(routed.column("id").unwrap().values, vec![Value::Int(1)]);
    }

    #[test]
    fn test_values_equal() {
        assert!(values_equal(&Value::Int(2), &Value::Float(2.0)));
        assert!(values_equal(&Value::Text("2".into()), &Value::Int(2)));
        assert!(values_equal(&Value::Text("x".into()), &Value::Text("x".into())));
        assert!(!values_equal(&Value::Null, &Value::Null));
        assert!(!values_equal(&Value::Bool(true), &Value::Text("x".into())));
    }

    #[test]
    fn test_registry_routes_by_name() {
        let registry = registry();
        assert_eq!(registry.table_names(), vec!["stories"]);
        assert!(registry.get("STORIES").is_some());

        let result = registry
            .select("SELECT title FROM Stories WHERE id = 2", None)
            .unwrap();
        assert_eq!(
            result.column("title").unwrap().values,
            vec![Value::Text("b".into())]
        );

        let result = registry
            .select("SELECT title FROM stories WHERE score >= 20 ORDER BY id", None)
            .unwrap();
        assert_eq!(result.num_rows(), 2);
    }

    #[test]
    fn test_registry_unknown_table() {
        let err = registry().select("SELECT * FROM comments", None).unwrap_err();
        assert!(matches!(err, QueryError::UnknownTable(ref name) if name == "comments"));
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = TableRegistry::new(QueryExecutor::new(RecordingEngine::default()));
        registry.register(Box::new(MemoryTable::new("t", Relation::empty())));
        registry.register(Box::new(MemoryTable::new("T", stories())));
        assert_eq!(registry.table_names(), vec!["T"]);
    }

    struct WatchedTable {
        fetched: Arc<AtomicBool>,
    }

    impl TableAdapter for WatchedTable {
        fn name(&self) -> &str {
            "watched"
        }

        fn columns(&self) -> Vec<String> {
            vec!["id".into()]
        }

        fn fetch(&self, _query: &SelectQuery) -> Result<Relation> {
            self.fetched.store(true, Ordering::SeqCst);
            Ok(Relation::empty())
        }
    }

    #[test]
    fn test_registry_rejects_before_fetch() {
        let fetched = Arc::new(AtomicBool::new(false));
        let engine = RecordingEngine::default();
        let mut registry = TableRegistry::new(QueryExecutor::new(engine.clone()));
        registry.register(Box::new(WatchedTable {
            fetched: fetched.clone(),
        }));

        let err = registry
            .select("SELECT * FROM watched JOIN other ON watched.id = other.id", None)
            .unwrap_err();
        assert!(matches!(err, QueryError::Unsupported(_)));
        assert!(!fetched.load(Ordering::SeqCst));
        assert!(engine.events().is_empty());
    }
}
