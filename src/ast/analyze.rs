/// Structural analysis of query trees.
///
/// Walks a query once and records which constructs it uses. The rewriter
/// relies on this to decide whether a query fits the single-table shape
/// before touching it.
use super::types::*;

/// Structural metadata about a query.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct QueryAnalysis {
    pub has_select: bool,
    pub is_raw: bool,
    pub has_distinct: bool,
    /// Entries in the outermost FROM list.
    pub table_count: usize,
    pub has_derived_tables: bool,
    pub has_joins: bool,
    pub join_count: usize,
    pub has_aggregation: bool,
    pub has_window_functions: bool,
    pub has_subqueries: bool,
    pub has_cte: bool,
    pub has_set_operations: bool,
    pub has_placeholders: bool,
    pub has_raw_fragments: bool,
}

impl QueryAnalysis {
    /// Whether the query is one SELECT over exactly one plain table.
    pub fn is_single_table_select(&self) -> bool {
        self.has_select
            && !self.is_raw
            && self.table_count == 1
            && !self.has_derived_tables
            && !self.has_joins
            && !self.has_subqueries
            && !self.has_cte
            && !self.has_set_operations
    }

    /// Human-readable list of the features that break the single-table shape.
    pub fn violations(&self) -> Vec<&'static str> {
        let mut found = Vec::new();
        if self.is_raw || !(self.has_select || self.has_set_operations) {
            found.push("not a SELECT statement");
        }
        if self.has_select && self.table_count != 1 {
            found.push("expected exactly one table in FROM");
        }
        if self.has_derived_tables {
            found.push("derived table in FROM");
        }
        if self.has_joins {
            found.push("JOIN");
        }
        if self.has_subqueries {
            found.push("subquery expression");
        }
        if self.has_cte {
            found.push("WITH clause");
        }
        if self.has_set_operations {
            found.push("set operation");
        }
        found
    }
}

/// Analyze a query and return metadata about its structure.
pub fn analyze_query(query: &Query) -> QueryAnalysis {
    let mut analysis = QueryAnalysis::default();
    match query {
        Query::Select(s) => analysis.table_count = s.from.len(),
        Query::Raw(_) => analysis.is_raw = true,
        Query::With { .. } | Query::Compound(_) => {}
    }
    analyze_query_inner(query, &mut analysis);
    analysis
}

fn analyze_query_inner(query: &Query, analysis: &mut QueryAnalysis) {
    match query {
        Query::Select(s) => {
            analysis.has_select = true;
            if s.distinct {
                analysis.has_distinct = true;
            }
            if !s.joins.is_empty() {
                analysis.has_joins = true;
                analysis.join_count += s.joins.len();
            }
            if !s.group_by.is_empty() {
                analysis.has_aggregation = true;
            }
            if !s.windows.is_empty() {
                analysis.has_window_functions = true;
            }
            for table in &s.from {
                match table {
                    TableRef::Table { .. } => {}
                    TableRef::Subquery { query, .. } => {
                        analysis.has_derived_tables = true;
                        analyze_query_inner(query, analysis);
                    }
                    TableRef::Other(_) => analysis.has_derived_tables = true,
                }
            }
            for item in &s.projections {
                if let SelectItem::Expression { expr, .. } = item {
                    check_expr_features(expr, analysis);
                }
            }
            let clauses = s
                .filter
                .iter()
                .chain(s.group_by.iter())
                .chain(s.having.iter())
                .chain(s.order_by.iter().map(|o| &o.expr))
                .chain(s.limit.iter())
                .chain(s.offset.iter());
            for expr in clauses {
                check_expr_features(expr, analysis);
            }
            for window in &s.windows {
                check_window_features(&window.spec, analysis);
            }
        }
        Query::With { body, .. } => {
            analysis.has_cte = true;
            analyze_query_inner(body, analysis);
        }
        Query::Compound(_) => analysis.has_set_operations = true,
        Query::Raw(_) => {}
    }
}

fn check_window_features(spec: &WindowSpec, analysis: &mut QueryAnalysis) {
    for expr in spec
        .partition_by
        .iter()
        .chain(spec.order_by.iter().map(|o| &o.expr))
    {
        check_expr_features(expr, analysis);
    }
}

fn check_expr_features(expr: &Expression, analysis: &mut QueryAnalysis) {
    match expr {
        Expression::Column { .. } | Expression::Literal(_) | Expression::Wildcard => {}
        Expression::Parameter(_) => analysis.has_placeholders = true,
        Expression::Raw(_) => analysis.has_raw_fragments = true,
        Expression::WindowFunction { function, window } => {
            analysis.has_window_functions = true;
            check_expr_features(function, analysis);
            check_window_features(window, analysis);
        }
        Expression::Subquery(q) | Expression::Exists(q) => {
            analysis.has_subqueries = true;
            analyze_query_inner(q, analysis);
        }
        Expression::InSubquery { expr, subquery, .. } => {
            analysis.has_subqueries = true;
            check_expr_features(expr, analysis);
            analyze_query_inner(subquery, analysis);
        }
        Expression::Aggregate { args, .. } => {
            analysis.has_aggregation = true;
            for arg in args {
                check_expr_features(arg, analysis);
            }
        }
        Expression::Function { args, .. } => {
            for arg in args {
                check_expr_features(arg, analysis);
            }
        }
        Expression::BinaryOp { left, right, .. } => {
            check_expr_features(left, analysis);
            check_expr_features(right, analysis);
        }
        Expression::UnaryOp { expr, .. }
        | Expression::IsNull { expr, .. }
        | Expression::IsTruth { expr, .. }
        | Expression::Cast { expr, .. }
        | Expression::Nested(expr) => check_expr_features(expr, analysis),
        Expression::Case {
            operand,
            when_clauses,
            else_clause,
        } => {
            if let Some(op) = operand {
                check_expr_features(op, analysis);
            }
            for (w, t) in when_clauses {
                check_expr_features(w, analysis);
                check_expr_features(t, analysis);
            }
            if let Some(e) = else_clause {
                check_expr_features(e, analysis);
            }
        }
        Expression::InList { expr, list, .. } => {
            check_expr_features(expr, analysis);
            for item in list {
                check_expr_features(item, analysis);
            }
        }
        Expression::Between {
            expr, low, high, ..
        } => {
            check_expr_features(expr, analysis);
            check_expr_features(low, analysis);
            check_expr_features(high, analysis);
        }
    }
}
