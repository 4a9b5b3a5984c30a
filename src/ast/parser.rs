/// SQL → query tree parser.
///
/// Translates SQL text into our internal tree using `sqlparser` as the
/// parsing frontend. Constructs without a dedicated node are kept as
/// `Expression::Raw` / `Query::Raw` so later stages can decide whether they
/// are acceptable.
use std::fmt;
use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use sqlparser::ast::{self as sp, Visit, Visitor};
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser as SqlParser;

use super::types::*;
use crate::error::{QueryError, Result};

/// Dialect the incoming SQL text is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceDialect {
    #[default]
    MySql,
    Postgres,
    Generic,
}

impl SourceDialect {
    fn parser_dialect(self) -> Box<dyn Dialect> {
        match self {
            SourceDialect::MySql => Box::new(MySqlDialect {}),
            SourceDialect::Postgres => Box::new(PostgreSqlDialect {}),
            SourceDialect::Generic => Box::new(GenericDialect {}),
        }
    }
}

/// Parse a MySQL SQL string into query trees.
pub fn parse_sql(sql: &str) -> Result<Vec<Query>> {
    parse_sql_with(sql, SourceDialect::MySql)
}

/// Parse a SQL string written in `dialect` into query trees.
pub fn parse_sql_with(sql: &str, dialect: SourceDialect) -> Result<Vec<Query>> {
    let parser_dialect = dialect.parser_dialect();
    let statements = SqlParser::parse_sql(parser_dialect.as_ref(), sql)
        .map_err(|e| QueryError::Parse(e.to_string()))?;

    statements.into_iter().map(convert_statement).collect()
}

/// Parse a single MySQL statement. Returns an error if the input contains
/// more than one statement.
pub fn parse_single(sql: &str) -> Result<Query> {
    parse_single_with(sql, SourceDialect::MySql)
}

pub fn parse_single_with(sql: &str, dialect: SourceDialect) -> Result<Query> {
    let mut queries = parse_sql_with(sql, dialect)?;
    if queries.len() != 1 {
        return Err(QueryError::Parse(format!(
            "expected 1 statement, found {}",
            queries.len()
        )));
    }
    Ok(queries.remove(0))
}

fn convert_statement(stmt: sp::Statement) -> Result<Query> {
    match stmt {
        sp::Statement::Query(q) => convert_query(*q),
        _ => Ok(Query::Raw(stmt.to_string())),
    }
}

fn convert_query(query: sp::Query) -> Result<Query> {
    let order_by_exprs: Vec<sp::OrderByExpr> =
        query.order_by.map(|ob| ob.exprs).unwrap_or_default();

    if let Some(with) = query.with {
        let ctes = with.cte_tables.iter().map(|cte| cte.to_string()).collect();
        let body = convert_set_expr(*query.body)?;
        let body = apply_query_modifiers(body, &order_by_exprs, &query.limit, &query.offset)?;
        return Ok(Query::With {
            ctes,
            body: Box::new(body),
        });
    }

    let body = convert_set_expr(*query.body)?;
    apply_query_modifiers(body, &order_by_exprs, &query.limit, &query.offset)
}

fn apply_query_modifiers(
    query: Query,
    order_by: &[sp::OrderByExpr],
    limit: &Option<sp::Expr>,
    offset: &Option<sp::Offset>,
) -> Result<Query> {
    // Only apply modifiers to Select queries
    if let Query::Select(mut select) = query {
        if !order_by.is_empty() {
            select.order_by = order_by
                .iter()
                .map(|o| convert_order_by(o.clone()))
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(l) = limit {
            select.limit = Some(convert_expr(l.clone())?);
        }
        if let Some(o) = offset {
            select.offset = Some(convert_expr(o.value.clone())?);
        }
        Ok(Query::Select(select))
    } else {
        Ok(query)
    }
}

fn convert_set_expr(expr: sp::SetExpr) -> Result<Query> {
    match expr {
        sp::SetExpr::Select(select) => convert_select(*select),
        sp::SetExpr::Query(query) => convert_query(*query),
        compound @ sp::SetExpr::SetOperation { .. } => Ok(Query::Compound(compound.to_string())),
        _ => Ok(Query::Raw(expr.to_string())),
    }
}

fn convert_select(select: sp::Select) -> Result<Query> {
    let distinct = match &select.distinct {
        None => false,
        Some(sp::Distinct::Distinct) => true,
        // DISTINCT ON has no counterpart in the tree
        Some(sp::Distinct::On(_)) => return Ok(Query::Raw(select.to_string())),
    };

    let projections = select
        .projection
        .into_iter()
        .map(convert_select_item)
        .collect::<Result<Vec<_>>>()?;

    let mut tables = Vec::with_capacity(select.from.len());
    let mut joins = Vec::new();
    for twj in select.from {
        joins.extend(twj.joins.iter().map(|join| join.to_string()));
        tables.push(convert_table_factor(twj.relation)?);
    }

    let filter = select.selection.map(convert_expr).transpose()?;

    let group_by = match select.group_by {
        sp::GroupByExpr::Expressions(exprs, _modifiers) => exprs
            .into_iter()
            .map(convert_expr)
            .collect::<Result<Vec<_>>>()?,
        sp::GroupByExpr::All(_) => vec![],
    };

    let having = select.having.map(convert_expr).transpose()?;

    let windows = select
        .named_window
        .into_iter()
        .map(|nw| {
            Ok(NamedWindowSpec {
                name: nw.0.value.clone(),
                spec: convert_window_spec_from_named(&nw.1)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Query::Select(Box::new(SelectQuery {
        distinct,
        projections,
        from: tables,
        joins,
        filter,
        group_by,
        having,
        windows,
        order_by: vec![],
        limit: None,
        offset: None,
    })))
}

fn convert_table_factor(tf: sp::TableFactor) -> Result<TableRef> {
    match tf {
        sp::TableFactor::Table { name, alias, .. } => {
            let mut parts: Vec<String> = name.0.into_iter().map(|p| p.value).collect();
            let table_name = parts.pop().unwrap_or_default();
            let schema = if parts.is_empty() {
                None
            } else {
                Some(parts.join("."))
            };
            Ok(TableRef::Table {
                schema,
                name: table_name,
                alias: alias.map(|a| a.name.value),
            })
        }
        sp::TableFactor::Derived {
            subquery, alias, ..
        } => {
            let alias_name = alias
                .map(|a| a.name.value)
                .unwrap_or_else(|| "_subquery".into());
            Ok(TableRef::Subquery {
                query: Box::new(convert_query(*subquery)?),
                alias: alias_name,
            })
        }
        other => Ok(TableRef::Other(other.to_string())),
    }
}

fn convert_select_item(item: sp::SelectItem) -> Result<SelectItem> {
    match item {
        sp::SelectItem::UnnamedExpr(expr) => Ok(SelectItem::Expression {
            expr: convert_expr(expr)?,
            alias: None,
        }),
        sp::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectItem::Expression {
            expr: convert_expr(expr)?,
            alias: Some(alias.value),
        }),
        sp::SelectItem::Wildcard(_) => Ok(SelectItem::Wildcard),
        sp::SelectItem::QualifiedWildcard(name, _) => {
            Ok(SelectItem::QualifiedWildcard(name.to_string()))
        }
    }
}

fn convert_expr(expr: sp::Expr) -> Result<Expression> {
    match expr {
        sp::Expr::Identifier(ident) => Ok(Expression::Column {
            table: None,
            name: ident.value,
        }),
        sp::Expr::CompoundIdentifier(parts) => {
            let mut names: Vec<String> = parts.into_iter().map(|p| p.value).collect();
            let name = names.pop().unwrap_or_default();
            let table = if names.is_empty() {
                None
            } else {
                Some(names.join("."))
            };
            Ok(Expression::Column { table, name })
        }
        sp::Expr::Value(val) => Ok(convert_value(val)),
        sp::Expr::BinaryOp { left, op, right } => match convert_binary_op(&op) {
            Some(converted) => Ok(Expression::BinaryOp {
                left: Box::new(convert_expr(*left)?),
                op: converted,
                right: Box::new(convert_expr(*right)?),
            }),
            None => raw_node(&sp::Expr::BinaryOp { left, op, right }),
        },
        sp::Expr::UnaryOp { op, expr } => match convert_unary_op(&op) {
            Some(converted) => Ok(Expression::UnaryOp {
                op: converted,
                expr: Box::new(convert_expr(*expr)?),
            }),
            None => raw_node(&sp::Expr::UnaryOp { op, expr }),
        },
        sp::Expr::Function(func) => convert_function(func),
        sp::Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            let when_clauses = conditions
                .into_iter()
                .zip(results)
                .map(|(c, r)| Ok((convert_expr(c)?, convert_expr(r)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Expression::Case {
                operand: operand.map(|o| convert_expr(*o)).transpose()?.map(Box::new),
                when_clauses,
                else_clause: else_result
                    .map(|e| convert_expr(*e))
                    .transpose()?
                    .map(Box::new),
            })
        }
        sp::Expr::Subquery(q) => Ok(Expression::Subquery(Box::new(convert_query(*q)?))),
        sp::Expr::Exists { subquery, negated } => {
            let exists = Expression::Exists(Box::new(convert_query(*subquery)?));
            if negated {
                Ok(Expression::UnaryOp {
                    op: UnaryOperator::Not,
                    expr: Box::new(exists),
                })
            } else {
                Ok(exists)
            }
        }
        sp::Expr::InList {
            expr,
            list,
            negated,
        } => Ok(Expression::InList {
            expr: Box::new(convert_expr(*expr)?),
            list: list
                .into_iter()
                .map(convert_expr)
                .collect::<Result<Vec<_>>>()?,
            negated,
        }),
        sp::Expr::InSubquery {
            expr,
            subquery,
            negated,
        } => Ok(Expression::InSubquery {
            expr: Box::new(convert_expr(*expr)?),
            subquery: Box::new(convert_query(*subquery)?),
            negated,
        }),
        sp::Expr::Between {
            expr,
            negated,
            low,
            high,
        } => Ok(Expression::Between {
            expr: Box::new(convert_expr(*expr)?),
            low: Box::new(convert_expr(*low)?),
            high: Box::new(convert_expr(*high)?),
            negated,
        }),
        sp::Expr::IsNull(expr) => Ok(Expression::IsNull {
            expr: Box::new(convert_expr(*expr)?),
            negated: false,
        }),
        sp::Expr::IsNotNull(expr) => Ok(Expression::IsNull {
            expr: Box::new(convert_expr(*expr)?),
            negated: true,
        }),
        sp::Expr::IsTrue(expr) => is_truth(*expr, Some(true), false),
        sp::Expr::IsNotTrue(expr) => is_truth(*expr, Some(true), true),
        sp::Expr::IsFalse(expr) => is_truth(*expr, Some(false), false),
        sp::Expr::IsNotFalse(expr) => is_truth(*expr, Some(false), true),
        sp::Expr::IsUnknown(expr) => is_truth(*expr, None, false),
        sp::Expr::IsNotUnknown(expr) => is_truth(*expr, None, true),
        sp::Expr::IsDistinctFrom(left, right) => Ok(Expression::BinaryOp {
            left: Box::new(convert_expr(*left)?),
            op: BinaryOperator::IsDistinctFrom,
            right: Box::new(convert_expr(*right)?),
        }),
        sp::Expr::IsNotDistinctFrom(left, right) => Ok(Expression::BinaryOp {
            left: Box::new(convert_expr(*left)?),
            op: BinaryOperator::NullSafeEq,
            right: Box::new(convert_expr(*right)?),
        }),
        rounding @ (sp::Expr::Ceil { .. } | sp::Expr::Floor { .. }) => convert_ceil_floor(rounding),
        sp::Expr::Substring {
            expr,
            substring_from,
            substring_for,
            ..
        } => {
            let mut args = vec![convert_expr(*expr)?];
            match (substring_from, substring_for) {
                (Some(from), Some(len)) => {
                    args.push(convert_expr(*from)?);
                    args.push(convert_expr(*len)?);
                }
                (Some(from), None) => args.push(convert_expr(*from)?),
                // SUBSTRING(s FOR n) starts at the first character
                (None, Some(len)) => {
                    args.push(Expression::Literal(Literal::Integer(1)));
                    args.push(convert_expr(*len)?);
                }
                (None, None) => {}
            }
            Ok(Expression::function("SUBSTRING", args))
        }
        sp::Expr::Trim {
            expr,
            trim_where,
            trim_what,
            trim_characters,
        } => {
            let name = match trim_where {
                Some(sp::TrimWhereField::Leading) => "LTRIM",
                Some(sp::TrimWhereField::Trailing) => "RTRIM",
                Some(sp::TrimWhereField::Both) | None => "TRIM",
            };
            let mut args = vec![convert_expr(*expr)?];
            if let Some(what) = trim_what {
                args.push(convert_expr(*what)?);
            }
            for characters in trim_characters.into_iter().flatten() {
                args.push(convert_expr(characters)?);
            }
            Ok(Expression::function(name, args))
        }
        sp::Expr::Position { expr, r#in } => Ok(Expression::function(
            "POSITION",
            vec![convert_expr(*expr)?, convert_expr(*r#in)?],
        )),
        sp::Expr::Cast {
            expr, data_type, ..
        } => Ok(Expression::Cast {
            expr: Box::new(convert_expr(*expr)?),
            data_type: data_type.to_string(),
        }),
        sp::Expr::TypedString { data_type, value } => Ok(Expression::Cast {
            expr: Box::new(Expression::Literal(Literal::String(value))),
            data_type: data_type.to_string(),
        }),
        sp::Expr::Extract { field, expr, .. } => Ok(Expression::Function {
            name: "DATE_PART".into(),
            args: vec![
                Expression::Literal(Literal::String(field.to_string().to_lowercase())),
                convert_expr(*expr)?,
            ],
            distinct: false,
        }),
        sp::Expr::Nested(expr) => Ok(Expression::Nested(Box::new(convert_expr(*expr)?))),
        sp::Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => {
            let op = if negated {
                BinaryOperator::NotLike
            } else {
                BinaryOperator::Like
            };
            Ok(Expression::BinaryOp {
                left: Box::new(convert_expr(*expr)?),
                op,
                right: Box::new(convert_expr(*pattern)?),
            })
        }
        sp::Expr::ILike {
            negated,
            expr,
            pattern,
            ..
        } => {
            let op = if negated {
                BinaryOperator::NotILike
            } else {
                BinaryOperator::ILike
            };
            Ok(Expression::BinaryOp {
                left: Box::new(convert_expr(*expr)?),
                op,
                right: Box::new(convert_expr(*pattern)?),
            })
        }
        sp::Expr::RLike {
            negated,
            expr,
            pattern,
            ..
        } => {
            let op = if negated {
                BinaryOperator::NotRegexMatch
            } else {
                BinaryOperator::RegexMatch
            };
            Ok(Expression::BinaryOp {
                left: Box::new(convert_expr(*expr)?),
                op,
                right: Box::new(convert_expr(*pattern)?),
            })
        }
        other => raw_node(&other),
    }
}

fn is_truth(expr: sp::Expr, value: Option<bool>, negated: bool) -> Result<Expression> {
    Ok(Expression::IsTruth {
        expr: Box::new(convert_expr(expr)?),
        value,
        negated,
    })
}

/// `CEIL(x)`, `CEIL(x, scale)` and the FLOOR forms become plain calls.
/// `CEIL(x TO unit)` has no engine counterpart and stays raw.
fn convert_ceil_floor(expr: sp::Expr) -> Result<Expression> {
    let (name, inner, field) = match expr {
        sp::Expr::Ceil { expr, field } => ("CEIL", expr, field),
        sp::Expr::Floor { expr, field } => ("FLOOR", expr, field),
        other => return raw_node(&other),
    };
    match field {
        sp::CeilFloorKind::DateTimeField(sp::DateTimeField::NoDateTime) => {
            Ok(Expression::function(name, vec![convert_expr(*inner)?]))
        }
        sp::CeilFloorKind::Scale(scale) => Ok(Expression::function(
            name,
            vec![convert_expr(*inner)?, convert_value(scale)],
        )),
        field if name == "CEIL" => raw_node(&sp::Expr::Ceil { expr: inner, field }),
        field => raw_node(&sp::Expr::Floor { expr: inner, field }),
    }
}

/// Keep a node the tree has no counterpart for as source SQL. A subquery
/// inside it would be invisible to the single-table check, so it is
/// refused here instead.
fn raw_node<T: Visit + fmt::Display>(node: &T) -> Result<Expression> {
    if contains_subquery(node) {
        return Err(QueryError::Unsupported(format!("subquery inside `{}`", node)));
    }
    Ok(Expression::Raw(node.to_string()))
}

struct SubqueryFinder;

impl Visitor for SubqueryFinder {
    type Break = ();

    fn pre_visit_query(&mut self, _query: &sp::Query) -> ControlFlow<()> {
        ControlFlow::Break(())
    }
}

fn contains_subquery<T: Visit>(node: &T) -> bool {
    node.visit(&mut SubqueryFinder).is_break()
}

fn convert_value(val: sp::Value) -> Expression {
    match val {
        sp::Value::Null => Expression::Literal(Literal::Null),
        sp::Value::Boolean(b) => Expression::Literal(Literal::Boolean(b)),
        sp::Value::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Expression::Literal(Literal::Integer(i))
            } else if let Ok(f) = n.parse::<f64>() {
                Expression::Literal(Literal::Float(f))
            } else {
                Expression::Raw(n)
            }
        }
        sp::Value::SingleQuotedString(s) => Expression::Literal(Literal::String(s)),
        sp::Value::DoubleQuotedString(s) => Expression::Literal(Literal::String(s)),
        sp::Value::Placeholder(p) => Expression::Parameter(p),
        other => Expression::Raw(other.to_string()),
    }
}

fn convert_binary_op(op: &sp::BinaryOperator) -> Option<BinaryOperator> {
    let converted = match op {
        sp::BinaryOperator::Eq => BinaryOperator::Eq,
        sp::BinaryOperator::NotEq => BinaryOperator::NotEq,
        sp::BinaryOperator::Lt => BinaryOperator::Lt,
        sp::BinaryOperator::LtEq => BinaryOperator::LtEq,
        sp::BinaryOperator::Gt => BinaryOperator::Gt,
        sp::BinaryOperator::GtEq => BinaryOperator::GtEq,
        sp::BinaryOperator::Spaceship => BinaryOperator::NullSafeEq,
        sp::BinaryOperator::And => BinaryOperator::And,
        sp::BinaryOperator::Or => BinaryOperator::Or,
        sp::BinaryOperator::Xor => BinaryOperator::Xor,
        sp::BinaryOperator::Plus => BinaryOperator::Plus,
        sp::BinaryOperator::Minus => BinaryOperator::Minus,
        sp::BinaryOperator::Multiply => BinaryOperator::Multiply,
        sp::BinaryOperator::Divide => BinaryOperator::Divide,
        sp::BinaryOperator::MyIntegerDivide => BinaryOperator::IntegerDivide,
        sp::BinaryOperator::Modulo => BinaryOperator::Modulo,
        sp::BinaryOperator::BitwiseAnd => BinaryOperator::BitwiseAnd,
        sp::BinaryOperator::BitwiseOr => BinaryOperator::BitwiseOr,
        sp::BinaryOperator::BitwiseXor => BinaryOperator::BitwiseXor,
        sp::BinaryOperator::StringConcat => BinaryOperator::Concat,
        sp::BinaryOperator::PGRegexMatch => BinaryOperator::RegexMatch,
        sp::BinaryOperator::PGRegexNotMatch => BinaryOperator::NotRegexMatch,
        _ => return None,
    };
    Some(converted)
}

fn convert_unary_op(op: &sp::UnaryOperator) -> Option<UnaryOperator> {
    match op {
        sp::UnaryOperator::Not => Some(UnaryOperator::Not),
        sp::UnaryOperator::Minus => Some(UnaryOperator::Minus),
        sp::UnaryOperator::Plus => Some(UnaryOperator::Plus),
        _ => None,
    }
}

fn convert_function(func: sp::Function) -> Result<Expression> {
    if func.filter.is_some() || !func.within_group.is_empty() {
        return raw_node(&func);
    }
    // Needed once the arguments have been taken apart
    let raw = raw_node(&func);
    let name = func.name.to_string();

    let (args, distinct) = match func.args {
        sp::FunctionArguments::List(arg_list) => {
            if !arg_list.clauses.is_empty() {
                return raw;
            }
            let distinct = matches!(
                arg_list.duplicate_treatment,
                Some(sp::DuplicateTreatment::Distinct)
            );
            let mut args = Vec::with_capacity(arg_list.args.len());
            for arg in arg_list.args {
                match arg {
                    sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Expr(e)) => {
                        args.push(convert_expr(e)?)
                    }
                    sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Wildcard) => {
                        args.push(Expression::Wildcard)
                    }
                    _ => return raw,
                }
            }
            (args, distinct)
        }
        sp::FunctionArguments::None => (vec![], false),
        sp::FunctionArguments::Subquery(q) => (
            vec![Expression::Subquery(Box::new(convert_query(*q)?))],
            false,
        ),
    };

    if let Some(over) = func.over {
        let window = match over {
            sp::WindowType::WindowSpec(spec) => convert_window_spec(spec)?,
            // References to named windows have no node of their own
            sp::WindowType::NamedWindow(_) => return raw,
        };

        let function = Expression::Function {
            name,
            args,
            distinct,
        };

        return Ok(Expression::WindowFunction {
            function: Box::new(function),
            window,
        });
    }

    let is_aggregate = matches!(
        name.to_uppercase().as_str(),
        "COUNT"
            | "SUM"
            | "AVG"
            | "MIN"
            | "MAX"
            | "GROUP_CONCAT"
            | "STDDEV"
            | "VARIANCE"
            | "BIT_AND"
            | "BIT_OR"
            | "ARRAY_AGG"
            | "STRING_AGG"
    );

    if is_aggregate {
        Ok(Expression::Aggregate {
            name,
            args,
            distinct,
        })
    } else {
        Ok(Expression::Function {
            name,
            args,
            distinct,
        })
    }
}

fn convert_window_spec(spec: sp::WindowSpec) -> Result<WindowSpec> {
    let partition_by = spec
        .partition_by
        .into_iter()
        .map(convert_expr)
        .collect::<Result<Vec<_>>>()?;

    let order_by = spec
        .order_by
        .into_iter()
        .map(convert_order_by)
        .collect::<Result<Vec<_>>>()?;

    let frame = spec.window_frame.map(convert_window_frame);

    Ok(WindowSpec {
        partition_by,
        order_by,
        frame,
    })
}

fn convert_window_spec_from_named(spec: &sp::NamedWindowExpr) -> Result<WindowSpec> {
    match spec {
        sp::NamedWindowExpr::NamedWindow(_ident) => Ok(WindowSpec::default()),
        sp::NamedWindowExpr::WindowSpec(spec) => convert_window_spec(spec.clone()),
    }
}

fn convert_window_frame(frame: sp::WindowFrame) -> WindowFrame {
    let mode = match frame.units {
        sp::WindowFrameUnits::Rows => WindowFrameMode::Rows,
        sp::WindowFrameUnits::Range => WindowFrameMode::Range,
        sp::WindowFrameUnits::Groups => WindowFrameMode::Groups,
    };

    let start = convert_window_frame_bound(frame.start_bound);
    let end = frame.end_bound.map(convert_window_frame_bound);

    WindowFrame { mode, start, end }
}

fn convert_window_frame_bound(bound: sp::WindowFrameBound) -> WindowFrameBound {
    match bound {
        sp::WindowFrameBound::CurrentRow => WindowFrameBound::CurrentRow,
        sp::WindowFrameBound::Preceding(expr) => WindowFrameBound::Preceding(frame_offset(expr)),
        sp::WindowFrameBound::Following(expr) => WindowFrameBound::Following(frame_offset(expr)),
    }
}

fn frame_offset(expr: Option<Box<sp::Expr>>) -> Option<u64> {
    match expr.map(|e| *e) {
        Some(sp::Expr::Value(sp::Value::Number(n, _))) => n.parse().ok(),
        _ => None,
    }
}

fn convert_order_by(order: sp::OrderByExpr) -> Result<OrderByExpr> {
    Ok(OrderByExpr {
        expr: convert_expr(order.expr)?,
        asc: order.asc,
        nulls_first: order.nulls_first,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select_of(sql: &str) -> SelectQuery {
        match parse_single(sql).unwrap() {
            Query::Select(s) => *s,
            other => panic!("Expected Select query, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_select() {
        let s = select_of("SELECT * FROM users");
        assert_eq!(s.projections.len(), 1);
        assert!(matches!(s.projections[0], SelectItem::Wildcard));
        assert_eq!(s.from.len(), 1);
    }

    #[test]
    fn test_parse_select_with_where() {
        let s = select_of("SELECT id, name FROM users WHERE age > 18");
        assert_eq!(s.projections.len(), 2);
        assert!(s.filter.is_some());
    }

    #[test]
    fn test_parse_backtick_identifiers() {
        let s = select_of("SELECT `user name` FROM `my db`.`users`");
        match &s.projections[0] {
            SelectItem::Expression { expr, .. } => {
                assert_eq!(expr, &Expression::column("user name"));
            }
            other => panic!("Expected expression, got {:?}", other),
        }
        assert_eq!(
            s.from[0],
            TableRef::Table {
                schema: Some("my db".into()),
                name: "users".into(),
                alias: None,
            }
        );
    }

    #[test]
    fn test_parse_multi_part_column() {
        let s = select_of("SELECT db.t.col FROM db.t");
        match &s.projections[0] {
            SelectItem::Expression { expr, .. } => assert_eq!(
                expr,
                &Expression::Column {
                    table: Some("db.t".into()),
                    name: "col".into(),
                }
            ),
            other => panic!("Expected expression, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_select_with_join() {
        let s = select_of("SELECT u.name, o.total FROM users u JOIN orders o ON u.id = o.user_id");
        assert_eq!(s.joins.len(), 1);
        assert_eq!(s.joins[0].trim(), "JOIN orders AS o ON u.id = o.user_id");
    }

    #[test]
    fn test_parse_select_with_group_by() {
        let s = select_of(
            "SELECT department, COUNT(*) FROM employees GROUP BY department HAVING COUNT(*) > 5",
        );
        assert_eq!(s.group_by.len(), 1);
        assert!(s.having.is_some());
    }

    #[test]
    fn test_parse_cte() {
        let q = parse_single(
            "WITH active AS (SELECT * FROM users WHERE active = true) SELECT * FROM active",
        )
        .unwrap();
        match q {
            Query::With { ctes, body } => {
                assert_eq!(ctes.len(), 1);
                assert!(ctes[0].starts_with("active AS ("));
                assert!(matches!(*body, Query::Select(_)));
            }
            _ => panic!("Expected CTE query"),
        }
    }

    #[test]
    fn test_parse_set_operation_is_compound() {
        let q = parse_single("SELECT id FROM a UNION ALL SELECT id FROM b").unwrap();
        assert_eq!(
            q,
            Query::Compound("SELECT id FROM a UNION ALL SELECT id FROM b".into())
        );
    }

    #[test]
    fn test_parse_window_function() {
        let s = select_of(
            "SELECT name, ROW_NUMBER() OVER (PARTITION BY dept ORDER BY salary DESC) FROM employees",
        );
        match &s.projections[1] {
            SelectItem::Expression { expr, .. } => {
                assert!(matches!(expr, Expression::WindowFunction { .. }));
            }
            _ => panic!("Expected window function expression"),
        }
    }

    #[test]
    fn test_parse_non_query_statement_is_raw() {
        let q = parse_single("DELETE FROM users WHERE id = 1").unwrap();
        assert!(matches!(q, Query::Raw(ref sql) if sql.starts_with("DELETE")));
    }

    #[test]
    fn test_parse_subquery() {
        let s = select_of("SELECT * FROM users WHERE id IN (SELECT user_id FROM active_users)");
        assert!(matches!(
            s.filter,
            Some(Expression::InSubquery { negated: false, .. })
        ));
    }

    #[test]
    fn test_parse_multiple_statements() {
        let queries = parse_sql("SELECT 1; SELECT 2").unwrap();
        assert_eq!(queries.len(), 2);
        assert!(parse_single("SELECT 1; SELECT 2").is_err());
    }

    #[test]
    fn test_parse_invalid_sql() {
        let err = parse_single("SELCT * FORM users").unwrap_err();
        assert!(matches!(err, QueryError::Parse(_)));
    }

    #[test]
    fn test_parse_order_by_limit() {
        let s = select_of("SELECT * FROM users ORDER BY name ASC LIMIT 10 OFFSET 5");
        assert_eq!(s.order_by.len(), 1);
        assert_eq!(s.order_by[0].asc, Some(true));
        assert_eq!(s.limit, Some(Expression::Literal(Literal::Integer(10))));
        assert_eq!(s.offset, Some(Expression::Literal(Literal::Integer(5))));
    }

    #[test]
    fn test_parse_truncate_function() {
        let s = select_of("SELECT TRUNCATE(3.14159, 2) FROM t");
        match &s.projections[0] {
            SelectItem::Expression { expr, .. } => assert_eq!(
                expr,
                &Expression::function(
                    "TRUNCATE",
                    vec![
                        Expression::Literal(Literal::Float(3.14159)),
                        Expression::Literal(Literal::Integer(2)),
                    ]
                )
            ),
            _ => panic!("Expected expression"),
        }
    }

    #[test]
    fn test_parse_mysql_operators() {
        let s = select_of("SELECT a DIV 2 FROM t WHERE name REGEXP '^a' AND b <=> NULL");
        match &s.projections[0] {
            SelectItem::Expression {
                expr: Expression::BinaryOp { op, .. },
                ..
            } => assert_eq!(op, &BinaryOperator::IntegerDivide),
            other => panic!("Expected binary op, got {:?}", other),
        }
        match s.filter {
            Some(Expression::BinaryOp { left, right, .. }) => {
                assert!(matches!(
                    *left,
                    Expression::BinaryOp {
                        op: BinaryOperator::RegexMatch,
                        ..
                    }
                ));
                assert!(matches!(
                    *right,
                    Expression::BinaryOp {
                        op: BinaryOperator::NullSafeEq,
                        ..
                    }
                ));
            }
            other => panic!("Expected AND, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_construct_is_raw() {
        let s = select_of("SELECT INTERVAL 1 DAY FROM t");
        match &s.projections[0] {
            SelectItem::Expression { expr, .. } => {
                assert!(matches!(expr, Expression::Raw(_)));
            }
            _ => panic!("Expected expression"),
        }
    }

    fn first_expr(sql: &str) -> Expression {
        match select_of(sql).projections.remove(0) {
            SelectItem::Expression { expr, .. } => expr,
            other => panic!("Expected expression, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_function_keeps_spelling() {
        assert_eq!(
            first_expr("SELECT upper(name) FROM t"),
            Expression::function("upper", vec![Expression::column("name")])
        );
        assert!(matches!(
            first_expr("SELECT count(*) FROM t"),
            Expression::Aggregate { ref name, .. } if name == "count"
        ));
    }

    #[test]
    fn test_parse_keyword_functions_as_calls() {
        let price = || Expression::Column {
            table: Some("t".into()),
            name: "Price".into(),
        };
        assert_eq!(
            first_expr("SELECT FLOOR(t.Price) FROM t"),
            Expression::function("FLOOR", vec![price()])
        );
        assert_eq!(
            first_expr("SELECT CEIL(t.Price, 1) FROM t"),
            Expression::function("CEIL", vec![price(), Expression::Literal(Literal::Integer(1))])
        );
        assert_eq!(
            first_expr("SELECT SUBSTRING(t.Price FOR 2) FROM t"),
            Expression::function(
                "SUBSTRING",
                vec![
                    price(),
                    Expression::Literal(Literal::Integer(1)),
                    Expression::Literal(Literal::Integer(2)),
                ]
            )
        );
        assert_eq!(
            first_expr("SELECT TRIM(TRAILING '0' FROM t.Price) FROM t"),
            Expression::function(
                "RTRIM",
                vec![price(), Expression::Literal(Literal::String("0".into()))]
            )
        );
        assert_eq!(
            first_expr("SELECT POSITION('1' IN t.Price) FROM t"),
            Expression::function(
                "POSITION",
                vec![Expression::Literal(Literal::String("1".into())), price()]
            )
        );
    }

    #[test]
    fn test_parse_truth_tests() {
        let s = select_of("SELECT * FROM t WHERE t.flag IS NOT TRUE");
        assert_eq!(
            s.filter,
            Some(Expression::IsTruth {
                expr: Box::new(Expression::Column {
                    table: Some("t".into()),
                    name: "flag".into(),
                }),
                value: Some(true),
                negated: true,
            })
        );
        assert!(matches!(
            first_expr("SELECT a IS UNKNOWN FROM t"),
            Expression::IsTruth { value: None, negated: false, .. }
        ));
        assert!(matches!(
            first_expr("SELECT a IS NOT DISTINCT FROM b FROM t"),
            Expression::BinaryOp { op: BinaryOperator::NullSafeEq, .. }
        ));
    }

    #[test]
    fn test_parse_refuses_subquery_in_raw_fragment() {
        for sql in [
            "SELECT name FROM t WHERE id = ANY(SELECT id FROM u)",
            "SELECT * FROM t WHERE a @> (SELECT b FROM u)",
        ] {
            let err = parse_single_with(sql, SourceDialect::Postgres).unwrap_err();
            assert!(
                matches!(err, QueryError::Unsupported(_)),
                "{} should be refused, got {:?}",
                sql,
                err
            );
        }
        // Raw fragments without subqueries are kept
        assert!(matches!(
            first_expr("SELECT INTERVAL 1 DAY FROM t"),
            Expression::Raw(_)
        ));
    }

    #[test]
    fn test_parse_placeholder() {
        let s = select_of("SELECT * FROM t WHERE id = ?");
        match s.filter {
            Some(Expression::BinaryOp { right, .. }) => {
                assert_eq!(*right, Expression::Parameter("?".into()));
            }
            other => panic!("Expected comparison, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_aggregate_distinct() {
        let s = select_of("SELECT COUNT(DISTINCT status) FROM orders");
        match &s.projections[0] {
            SelectItem::Expression {
                expr: Expression::Aggregate { distinct, name, .. },
                ..
            } => {
                assert!(distinct);
                assert_eq!(name, "COUNT");
            }
            other => panic!("Expected aggregate, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_postgres_dialect() {
        let q = parse_single_with("SELECT \"Name\" FROM users", SourceDialect::Postgres).unwrap();
        match q {
            Query::Select(s) => match &s.projections[0] {
                SelectItem::Expression { expr, .. } => {
                    assert_eq!(expr, &Expression::column("Name"))
                }
                _ => panic!("Expected expression"),
            },
            _ => panic!("Expected Select query"),
        }
    }
}
