/// Single-table query rewriting.
///
/// Rebinds a SELECT over one caller-visible table to the internal alias the
/// relation is registered under, strips column qualification, resolves
/// session-dependent calls and translates functions whose semantics differ
/// between the source dialect and the engine. The rewrite is one recursive
/// transform: children are rewritten before their parent and a replacement
/// node is never visited again.
use std::collections::BTreeSet;

use tracing::debug;

use super::analyze::analyze_query;
use super::compiler::compile;
use super::types::*;
use crate::error::{QueryError, Result};
use crate::session::QuerySession;

/// Name the relation is registered under inside the engine.
pub const DEFAULT_TABLE_ALIAS: &str = "df_table";

/// Output of [`Rewriter::rewrite`].
#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenQuery {
    pub query: Query,
    /// Table name as written in the original FROM clause.
    pub table_name: String,
    /// Columns read through `JSON_EXTRACT`, by bare name.
    pub json_columns: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct Rewriter {
    alias: String,
    database: Option<String>,
    columns: Vec<String>,
}

impl Rewriter {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            database: None,
            columns: Vec::new(),
        }
    }

    pub fn with_session(mut self, session: Option<&QuerySession>) -> Self {
        self.database = session.and_then(|s| s.database.clone());
        self
    }

    /// Column names of the relation the query will run against. Enables
    /// case-insensitive rebinding of column references.
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn rewrite(&self, query: Query) -> Result<RewrittenQuery> {
        let analysis = analyze_query(&query);
        if !analysis.is_single_table_select() {
            return Err(QueryError::Unsupported(format!(
                "{} in `{}`",
                analysis.violations().join(", "),
                compile(&query)
            )));
        }

        let mut select = match query {
            Query::Select(select) => *select,
            other => {
                return Err(QueryError::Unsupported(compile(&other)));
            }
        };

        let table_name = match select.from.pop() {
            Some(TableRef::Table { name, .. }) => name,
            _ => {
                return Err(QueryError::Unsupported(
                    "expected a plain table reference in FROM".into(),
                ))
            }
        };
        select.from = vec![TableRef::Table {
            schema: None,
            name: self.alias.clone(),
            alias: None,
        }];

        let output_aliases: Vec<String> = select
            .projections
            .iter()
            .filter_map(|item| match item {
                SelectItem::Expression {
                    alias: Some(alias), ..
                } => Some(alias.clone()),
                _ => None,
            })
            .collect();

        let mut pass = RewritePass {
            rewriter: self,
            output_aliases: &output_aliases,
            aliases_visible: false,
            json_columns: BTreeSet::new(),
        };
        let select = pass.select(select);
        let json_columns = pass.json_columns;

        debug!(
            table = %table_name,
            alias = %self.alias,
            json_columns = ?json_columns,
            "rewrote query"
        );

        Ok(RewrittenQuery {
            query: Query::Select(Box::new(select)),
            table_name,
            json_columns,
        })
    }

    /// Resolve a bare column name against the relation's columns.
    fn bind_column(&self, name: String) -> String {
        if self.columns.is_empty() || self.columns.iter().any(|c| *c == name) {
            return name;
        }
        let mut matches = self
            .columns
            .iter()
            .filter(|c| c.eq_ignore_ascii_case(&name));
        match (matches.next(), matches.next()) {
            (Some(only), None) => only.clone(),
            _ => name,
        }
    }
}

struct RewritePass<'a> {
    rewriter: &'a Rewriter,
    output_aliases: &'a [String],
    /// Set while in GROUP BY, HAVING and ORDER BY, where a reference may
    /// name a projection alias instead of a relation column.
    aliases_visible: bool,
    json_columns: BTreeSet<String>,
}

impl RewritePass<'_> {
    fn select(&mut self, mut select: SelectQuery) -> SelectQuery {
        select.projections = select
            .projections
            .into_iter()
            .map(|item| match item {
                SelectItem::QualifiedWildcard(_) | SelectItem::Wildcard => SelectItem::Wildcard,
                SelectItem::Expression { expr, alias } => SelectItem::Expression {
                    expr: self.expr(expr),
                    alias,
                },
            })
            .collect();
        select.filter = select.filter.map(|e| self.expr(e));
        select.windows = select
            .windows
            .into_iter()
            .map(|w| NamedWindowSpec {
                name: w.name,
                spec: self.window(w.spec),
            })
            .collect();
        select.limit = select.limit.map(|e| self.expr(e));
        select.offset = select.offset.map(|e| self.expr(e));

        self.aliases_visible = true;
        select.group_by = self.exprs(select.group_by);
        select.having = select.having.map(|e| self.expr(e));
        select.order_by = self.order_by(select.order_by);
        self.aliases_visible = false;
        select
    }

    fn exprs(&mut self, exprs: Vec<Expression>) -> Vec<Expression> {
        exprs.into_iter().map(|e| self.expr(e)).collect()
    }

    fn boxed(&mut self, expr: Box<Expression>) -> Box<Expression> {
        Box::new(self.expr(*expr))
    }

    fn order_by(&mut self, order_by: Vec<OrderByExpr>) -> Vec<OrderByExpr> {
        order_by
            .into_iter()
            .map(|o| OrderByExpr {
                expr: self.expr(o.expr),
                ..o
            })
            .collect()
    }

    fn window(&mut self, spec: WindowSpec) -> WindowSpec {
        WindowSpec {
            partition_by: self.exprs(spec.partition_by),
            order_by: self.order_by(spec.order_by),
            frame: spec.frame,
        }
    }

    fn expr(&mut self, expr: Expression) -> Expression {
        match expr {
            Expression::Column { name, .. } => {
                let name = if self.aliases_visible && self.output_aliases.contains(&name) {
                    name
                } else {
                    self.rewriter.bind_column(name)
                };
                Expression::Column { table: None, name }
            }
            Expression::Function {
                name,
                args,
                distinct,
            } => {
                let args = self.exprs(args);
                self.function(name, args, distinct)
            }
            Expression::Aggregate {
                name,
                args,
                distinct,
            } => Expression::Aggregate {
                name,
                args: self.exprs(args),
                distinct,
            },
            Expression::WindowFunction { function, window } => Expression::WindowFunction {
                function: self.boxed(function),
                window: self.window(window),
            },
            Expression::BinaryOp { left, op, right } => Expression::BinaryOp {
                left: self.boxed(left),
                op,
                right: self.boxed(right),
            },
            Expression::UnaryOp { op, expr } => Expression::UnaryOp {
                op,
                expr: self.boxed(expr),
            },
            Expression::Case {
                operand,
                when_clauses,
                else_clause,
            } => Expression::Case {
                operand: operand.map(|o| self.boxed(o)),
                when_clauses: when_clauses
                    .into_iter()
                    .map(|(w, t)| (self.expr(w), self.expr(t)))
                    .collect(),
                else_clause: else_clause.map(|e| self.boxed(e)),
            },
            Expression::InList {
                expr,
                list,
                negated,
            } => Expression::InList {
                expr: self.boxed(expr),
                list: self.exprs(list),
                negated,
            },
            Expression::Between {
                expr,
                low,
                high,
                negated,
            } => Expression::Between {
                expr: self.boxed(expr),
                low: self.boxed(low),
                high: self.boxed(high),
                negated,
            },
            Expression::IsNull { expr, negated } => Expression::IsNull {
                expr: self.boxed(expr),
                negated,
            },
            Expression::IsTruth {
                expr,
                value,
                negated,
            } => Expression::IsTruth {
                expr: self.boxed(expr),
                value,
                negated,
            },
            Expression::Cast { expr, data_type } => Expression::Cast {
                expr: self.boxed(expr),
                data_type,
            },
            Expression::Nested(expr) => Expression::Nested(self.boxed(expr)),
            // Leaves, raw fragments, and subquery forms already rejected by
            // the shape check
            other @ (Expression::Literal(_)
            | Expression::Wildcard
            | Expression::Parameter(_)
            | Expression::Raw(_)
            | Expression::Subquery(_)
            | Expression::Exists(_)
            | Expression::InSubquery { .. }) => other,
        }
    }

    /// Rewrite a scalar call whose arguments are already rewritten.
    fn function(&mut self, name: String, mut args: Vec<Expression>, distinct: bool) -> Expression {
        if name.eq_ignore_ascii_case("DATABASE") && args.is_empty() {
            return match &self.rewriter.database {
                Some(db) => Expression::Literal(Literal::String(db.clone())),
                None => Expression::Literal(Literal::Null),
            };
        }

        if name.eq_ignore_ascii_case("TRUNCATE") && (1..=2).contains(&args.len()) {
            if args.len() == 1 {
                args.push(Expression::Literal(Literal::Integer(0)));
            }
            return Expression::Function {
                name: "ROUND".into(),
                args,
                distinct,
            };
        }

        if name.eq_ignore_ascii_case("JSON_EXTRACT") {
            if let Some(Expression::Column { name: column, .. }) = args.first() {
                self.json_columns.insert(column.clone());
            }
        }

        Expression::Function {
            name,
            args,
            distinct,
        }
    }
}
