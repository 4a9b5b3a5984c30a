/// Query tree → engine SQL compiler.
///
/// Renders our query tree into the SQL dialect accepted by the embedded
/// engine (PostgreSQL flavoured). Identifiers are always double-quoted so the
/// engine sees the exact column names of the relation, and MySQL-only
/// functions and operators are translated on the way out.
///
/// Two modes are supported. `Strict` refuses anything it cannot translate
/// faithfully; `Lenient` emits raw fragments verbatim and degrades
/// untranslatable calls to `NULL`.
use tracing::warn;

use super::types::*;
use crate::error::{QueryError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Strict,
    Lenient,
}

/// Session or server functions that have no engine equivalent.
const UNTRANSLATABLE_FUNCTIONS: &[&str] = &[
    "FOUND_ROWS",
    "LAST_INSERT_ID",
    "CONNECTION_ID",
    "USER",
    "CURRENT_USER",
    "SESSION_USER",
    "SYSTEM_USER",
    "VERSION",
    "DATABASE",
    "SCHEMA",
];

/// Render a query with the given mode.
pub fn render(query: &Query, mode: RenderMode) -> Result<String> {
    Compiler::quoted(mode).query(query)
}

/// Render strictly, falling back to lenient rendering when strict fails.
pub fn render_with_fallback(query: &Query) -> Result<String> {
    match render(query, RenderMode::Strict) {
        Ok(sql) => Ok(sql),
        Err(err) => {
            warn!(error = %err, query = ?query, "strict rendering failed, retrying leniently");
            render(query, RenderMode::Lenient)
        }
    }
}

/// Human-readable text of an expression: identifiers unquoted and function
/// calls left as written. Used to label computed result columns.
pub fn display_expr(expr: &Expression) -> String {
    Compiler {
        mode: RenderMode::Lenient,
        display: true,
    }
    .expr(expr)
    .unwrap_or_default()
}

/// Lenient rendering, used wherever a best-effort SQL string is wanted.
pub fn compile(query: &Query) -> String {
    // Lenient mode has no failure paths
    render(query, RenderMode::Lenient).unwrap_or_default()
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

struct Compiler {
    mode: RenderMode,
    /// Render for people rather than the engine.
    display: bool,
}

impl Compiler {
    fn quoted(mode: RenderMode) -> Self {
        Self {
            mode,
            display: false,
        }
    }

    fn ident(&self, name: &str) -> String {
        if self.display {
            name.to_string()
        } else {
            quote_ident(name)
        }
    }

    fn strict(&self) -> bool {
        self.mode == RenderMode::Strict
    }

    fn query(&self, query: &Query) -> Result<String> {
        match query {
            Query::Select(s) => self.select(s),
            Query::With { ctes, body } => {
                let body = self.query(body)?;
                Ok(format!("WITH {} {}", self.raw(&ctes.join(", "))?, body))
            }
            Query::Compound(sql) => self.raw(sql),
            Query::Raw(sql) => {
                if self.strict() {
                    Err(QueryError::Render(format!("not a query: {}", sql)))
                } else {
                    Ok(sql.clone())
                }
            }
        }
    }

    fn select(&self, select: &SelectQuery) -> Result<String> {
        let mut parts = Vec::new();

        let mut select_clause = String::from("SELECT ");
        if select.distinct {
            select_clause.push_str("DISTINCT ");
        }
        if select.projections.is_empty() {
            select_clause.push('*');
        } else {
            let items = select
                .projections
                .iter()
                .map(|item| self.select_item(item))
                .collect::<Result<Vec<_>>>()?;
            select_clause.push_str(&items.join(", "));
        }
        parts.push(select_clause);

        if !select.from.is_empty() {
            let tables = select
                .from
                .iter()
                .map(|t| self.table_ref(t))
                .collect::<Result<Vec<_>>>()?;
            parts.push(format!("FROM {}", tables.join(", ")));
        }

        for join in &select.joins {
            parts.push(self.raw(join.trim())?);
        }

        if let Some(ref filter) = select.filter {
            parts.push(format!("WHERE {}", self.expr(filter)?));
        }

        if !select.group_by.is_empty() {
            parts.push(format!("GROUP BY {}", self.expr_list(&select.group_by)?));
        }

        if let Some(ref having) = select.having {
            parts.push(format!("HAVING {}", self.expr(having)?));
        }

        for window in &select.windows {
            parts.push(format!(
                "WINDOW {} AS ({})",
                self.ident(&window.name),
                self.window_spec(&window.spec)?
            ));
        }

        if !select.order_by.is_empty() {
            let orders = select
                .order_by
                .iter()
                .map(|o| self.order_by(o))
                .collect::<Result<Vec<_>>>()?;
            parts.push(format!("ORDER BY {}", orders.join(", ")));
        }

        if let Some(ref limit) = select.limit {
            parts.push(format!("LIMIT {}", self.expr(limit)?));
        }

        if let Some(ref offset) = select.offset {
            parts.push(format!("OFFSET {}", self.expr(offset)?));
        }

        Ok(parts.join(" "))
    }

    fn select_item(&self, item: &SelectItem) -> Result<String> {
        match item {
            SelectItem::Wildcard => Ok("*".to_string()),
            SelectItem::QualifiedWildcard(table) => Ok(format!("{}.*", self.ident(table))),
            SelectItem::Expression { expr, alias } => {
                let expr_str = self.expr(expr)?;
                Ok(match alias {
                    Some(a) => format!("{} AS {}", expr_str, self.ident(a)),
                    None => expr_str,
                })
            }
        }
    }

    fn table_ref(&self, table: &TableRef) -> Result<String> {
        match table {
            TableRef::Table {
                schema,
                name,
                alias,
            } => {
                let mut s = match schema {
                    Some(sc) => format!("{}.{}", self.ident(sc), self.ident(name)),
                    None => self.ident(name),
                };
                if let Some(a) = alias {
                    s.push_str(&format!(" AS {}", self.ident(a)));
                }
                Ok(s)
            }
            TableRef::Subquery { query, alias } => {
                Ok(format!("({}) AS {}", self.query(query)?, self.ident(alias)))
            }
            TableRef::Other(raw) => self.raw(raw),
        }
    }

    fn raw(&self, raw: &str) -> Result<String> {
        if self.strict() {
            Err(QueryError::Render(format!(
                "no engine translation for '{}'",
                raw
            )))
        } else {
            Ok(raw.to_string())
        }
    }

    fn expr_list(&self, exprs: &[Expression]) -> Result<String> {
        let items = exprs
            .iter()
            .map(|e| self.expr(e))
            .collect::<Result<Vec<_>>>()?;
        Ok(items.join(", "))
    }

    fn expr(&self, expr: &Expression) -> Result<String> {
        let rendered = match expr {
            Expression::Column { table, name } => match table {
                Some(t) => format!("{}.{}", self.ident(t), self.ident(name)),
                None => self.ident(name),
            },
            Expression::Literal(lit) => render_literal(lit),
            Expression::BinaryOp { left, op, right } => {
                let l = self.expr(left)?;
                let r = self.expr(right)?;
                match op {
                    BinaryOperator::IntegerDivide if !self.display => {
                        format!("CAST(TRUNC(({}) / ({})) AS BIGINT)", l, r)
                    }
                    BinaryOperator::Xor if !self.display => format!("(({}) <> ({}))", l, r),
                    other => format!("{} {} {}", l, binary_op_symbol(other), r),
                }
            }
            Expression::UnaryOp { op, expr } => {
                let inner = self.expr(expr)?;
                match op {
                    UnaryOperator::Not => format!("NOT {}", inner),
                    UnaryOperator::Minus => format!("-{}", inner),
                    UnaryOperator::Plus => format!("+{}", inner),
                }
            }
            Expression::Function {
                name,
                args,
                distinct,
            } => return self.function(name, args, *distinct),
            Expression::Aggregate {
                name,
                args,
                distinct,
            } => return self.aggregate(name, args, *distinct),
            Expression::WindowFunction { function, window } => {
                format!("{} OVER ({})", self.expr(function)?, self.window_spec(window)?)
            }
            Expression::Case {
                operand,
                when_clauses,
                else_clause,
            } => {
                let mut s = String::from("CASE");
                if let Some(op) = operand {
                    s.push_str(&format!(" {}", self.expr(op)?));
                }
                for (when, then) in when_clauses {
                    s.push_str(&format!(
                        " WHEN {} THEN {}",
                        self.expr(when)?,
                        self.expr(then)?
                    ));
                }
                if let Some(else_expr) = else_clause {
                    s.push_str(&format!(" ELSE {}", self.expr(else_expr)?));
                }
                s.push_str(" END");
                s
            }
            Expression::Subquery(q) => format!("({})", self.query(q)?),
            Expression::Exists(q) => format!("EXISTS ({})", self.query(q)?),
            Expression::InList {
                expr,
                list,
                negated,
            } => {
                let not_str = if *negated { "NOT " } else { "" };
                format!(
                    "{} {}IN ({})",
                    self.expr(expr)?,
                    not_str,
                    self.expr_list(list)?
                )
            }
            Expression::InSubquery {
                expr,
                subquery,
                negated,
            } => {
                let not_str = if *negated { "NOT " } else { "" };
                format!(
                    "{} {}IN ({})",
                    self.expr(expr)?,
                    not_str,
                    self.query(subquery)?
                )
            }
            Expression::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let not_str = if *negated { "NOT " } else { "" };
                format!(
                    "{} {}BETWEEN {} AND {}",
                    self.expr(expr)?,
                    not_str,
                    self.expr(low)?,
                    self.expr(high)?
                )
            }
            Expression::IsNull { expr, negated } => {
                if *negated {
                    format!("{} IS NOT NULL", self.expr(expr)?)
                } else {
                    format!("{} IS NULL", self.expr(expr)?)
                }
            }
            Expression::IsTruth {
                expr,
                value,
                negated,
            } => {
                let not_str = if *negated { "NOT " } else { "" };
                let value_str = match value {
                    Some(true) => "TRUE",
                    Some(false) => "FALSE",
                    None => "UNKNOWN",
                };
                format!("{} IS {}{}", self.expr(expr)?, not_str, value_str)
            }
            Expression::Cast { expr, data_type } => {
                format!("CAST({} AS {})", self.expr(expr)?, engine_cast_type(data_type))
            }
            Expression::Wildcard => "*".to_string(),
            Expression::Parameter(p) => {
                if self.strict() {
                    return Err(QueryError::Render(format!(
                        "unbound parameter placeholder '{}'",
                        p
                    )));
                }
                "NULL".to_string()
            }
            Expression::Nested(expr) => format!("({})", self.expr(expr)?),
            Expression::Raw(raw) => return self.raw(raw),
        };
        Ok(rendered)
    }

    fn function(&self, name: &str, args: &[Expression], distinct: bool) -> Result<String> {
        if self.display {
            return self.call(name, args, distinct);
        }
        let upper = name.to_uppercase();

        if UNTRANSLATABLE_FUNCTIONS.contains(&upper.as_str()) {
            if self.strict() {
                return Err(QueryError::Render(format!(
                    "function {}() has no engine equivalent",
                    upper
                )));
            }
            return Ok("NULL".to_string());
        }

        let translated = match (upper.as_str(), args.len()) {
            ("IF", 3) => {
                return Ok(format!(
                    "CASE WHEN {} THEN {} ELSE {} END",
                    self.expr(&args[0])?,
                    self.expr(&args[1])?,
                    self.expr(&args[2])?
                ))
            }
            ("IFNULL", _) => "COALESCE",
            ("LCASE", _) => "LOWER",
            ("UCASE", _) => "UPPER",
            ("RAND", _) => "RANDOM",
            ("CURDATE", 0) => return Ok("CURRENT_DATE".to_string()),
            ("CHAR_LENGTH", _) => "CHARACTER_LENGTH",
            // Needle first; the engine takes the haystack first
            ("POSITION", 2) | ("LOCATE", 2) => {
                return Ok(format!(
                    "STRPOS({}, {})",
                    self.expr(&args[1])?,
                    self.expr(&args[0])?
                ))
            }
            ("INSTR", 2) => "STRPOS",
            _ => name,
        };

        self.call(translated, args, distinct)
    }

    fn call(&self, name: &str, args: &[Expression], distinct: bool) -> Result<String> {
        let distinct_str = if distinct { "DISTINCT " } else { "" };
        Ok(format!("{}({}{})", name, distinct_str, self.expr_list(args)?))
    }

    fn aggregate(&self, name: &str, args: &[Expression], distinct: bool) -> Result<String> {
        let distinct_str = if distinct { "DISTINCT " } else { "" };
        if !self.display && name.eq_ignore_ascii_case("GROUP_CONCAT") && args.len() == 1 {
            return Ok(format!(
                "STRING_AGG({}CAST({} AS VARCHAR), ',')",
                distinct_str,
                self.expr(&args[0])?
            ));
        }
        Ok(format!("{}({}{})", name, distinct_str, self.expr_list(args)?))
    }

    fn window_spec(&self, spec: &WindowSpec) -> Result<String> {
        let mut parts = Vec::new();

        if !spec.partition_by.is_empty() {
            parts.push(format!("PARTITION BY {}", self.expr_list(&spec.partition_by)?));
        }

        if !spec.order_by.is_empty() {
            let orders = spec
                .order_by
                .iter()
                .map(|o| self.order_by(o))
                .collect::<Result<Vec<_>>>()?;
            parts.push(format!("ORDER BY {}", orders.join(", ")));
        }

        if let Some(ref frame) = spec.frame {
            parts.push(render_window_frame(frame));
        }

        Ok(parts.join(" "))
    }

    fn order_by(&self, order: &OrderByExpr) -> Result<String> {
        let mut s = self.expr(&order.expr)?;
        match order.asc {
            Some(true) => s.push_str(" ASC"),
            Some(false) => s.push_str(" DESC"),
            None => {}
        }
        match order.nulls_first {
            Some(true) => s.push_str(" NULLS FIRST"),
            Some(false) => s.push_str(" NULLS LAST"),
            None => {}
        }
        Ok(s)
    }
}

fn binary_op_symbol(op: &BinaryOperator) -> &'static str {
    match op {
        BinaryOperator::Eq => "=",
        BinaryOperator::NotEq => "<>",
        BinaryOperator::Lt => "<",
        BinaryOperator::LtEq => "<=",
        BinaryOperator::Gt => ">",
        BinaryOperator::GtEq => ">=",
        BinaryOperator::NullSafeEq => "IS NOT DISTINCT FROM",
        BinaryOperator::IsDistinctFrom => "IS DISTINCT FROM",
        BinaryOperator::And => "AND",
        BinaryOperator::Or => "OR",
        BinaryOperator::Xor => "XOR",
        BinaryOperator::Plus => "+",
        BinaryOperator::Minus => "-",
        BinaryOperator::Multiply => "*",
        BinaryOperator::Divide => "/",
        BinaryOperator::IntegerDivide => "DIV",
        BinaryOperator::Modulo => "%",
        BinaryOperator::BitwiseAnd => "&",
        BinaryOperator::BitwiseOr => "|",
        BinaryOperator::BitwiseXor => "^",
        BinaryOperator::Like => "LIKE",
        BinaryOperator::ILike => "ILIKE",
        BinaryOperator::NotLike => "NOT LIKE",
        BinaryOperator::NotILike => "NOT ILIKE",
        BinaryOperator::RegexMatch => "~",
        BinaryOperator::NotRegexMatch => "!~",
        BinaryOperator::Concat => "||",
    }
}

fn render_literal(lit: &Literal) -> String {
    match lit {
        Literal::Null => "NULL".to_string(),
        Literal::Boolean(b) => {
            if *b {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        }
        Literal::Integer(i) => i.to_string(),
        Literal::Float(f) => render_float(*f),
        Literal::String(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

/// Floats always carry a decimal point so the engine keeps them floating.
fn render_float(f: f64) -> String {
    if !f.is_finite() {
        return format!("CAST('{}' AS DOUBLE)", f);
    }
    let s = f.to_string();
    if s.contains(['.', 'e', 'E']) {
        s
    } else {
        format!("{}.0", s)
    }
}

/// MySQL cast targets mapped onto engine type names.
fn engine_cast_type(data_type: &str) -> String {
    let upper = data_type.trim().to_uppercase();
    let base = upper.split('(').next().unwrap_or("").trim();
    match base {
        "SIGNED" | "SIGNED INTEGER" | "UNSIGNED" | "UNSIGNED INTEGER" => "BIGINT".to_string(),
        "CHAR" | "NCHAR" | "JSON" => "VARCHAR".to_string(),
        "DATETIME" => "TIMESTAMP".to_string(),
        _ => data_type.to_string(),
    }
}

fn render_window_frame(frame: &WindowFrame) -> String {
    let mode = match frame.mode {
        WindowFrameMode::Rows => "ROWS",
        WindowFrameMode::Range => "RANGE",
        WindowFrameMode::Groups => "GROUPS",
    };

    let start = render_window_frame_bound(&frame.start);

    match &frame.end {
        Some(end) => format!(
            "{} BETWEEN {} AND {}",
            mode,
            start,
            render_window_frame_bound(end)
        ),
        None => format!("{} {}", mode, start),
    }
}

fn render_window_frame_bound(bound: &WindowFrameBound) -> String {
    match bound {
        WindowFrameBound::CurrentRow => "CURRENT ROW".to_string(),
        WindowFrameBound::Preceding(None) => "UNBOUNDED PRECEDING".to_string(),
        WindowFrameBound::Preceding(Some(n)) => format!("{} PRECEDING", n),
        WindowFrameBound::Following(None) => "UNBOUNDED FOLLOWING".to_string(),
        WindowFrameBound::Following(Some(n)) => format!("{} FOLLOWING", n),
    }
}
