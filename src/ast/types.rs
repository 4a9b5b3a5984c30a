//! Query tree types for framesql.
//!
//! The tree is owned and clone-based: the rewriter consumes a tree and
//! returns a new one, the compiler only borrows it. Only the statement
//! shapes the adapter can reason about get a dedicated node; everything else
//! is kept as raw SQL so the contract check can reject it with context.

/// Top-level query representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Select(Box<SelectQuery>),
    /// `WITH ... <body>`; the CTE definitions are kept as source SQL.
    With { ctes: Vec<String>, body: Box<Query> },
    /// UNION / INTERSECT / EXCEPT, kept as source SQL.
    Compound(String),
    /// Raw SQL passthrough for statements that are not queries.
    Raw(String),
}

/// A SELECT query with all standard SQL clauses.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectQuery {
    pub distinct: bool,
    pub projections: Vec<SelectItem>,
    pub from: Vec<TableRef>,
    /// JOIN clauses as source SQL. Never executed, only reported.
    pub joins: Vec<String>,
    pub filter: Option<Expression>,
    pub group_by: Vec<Expression>,
    pub having: Option<Expression>,
    pub windows: Vec<NamedWindowSpec>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
}

/// A single item in the SELECT projection list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    /// `table.*`
    QualifiedWildcard(String),
    /// An expression, optionally aliased: `expr AS alias`.
    Expression {
        expr: Expression,
        alias: Option<String>,
    },
}

/// Table reference in FROM clause.
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    /// Simple table: `schema.table AS alias`
    Table {
        schema: Option<String>,
        name: String,
        alias: Option<String>,
    },
    /// Subquery: `(SELECT ...) AS alias`
    Subquery { query: Box<Query>, alias: String },
    /// Anything else in table position (table functions, UNNEST, ...).
    Other(String),
}

/// Core expression type. Recursive to support arbitrary nesting.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Column reference: `table.column` or just `column`.
    Column { table: Option<String>, name: String },
    /// Literal value.
    Literal(Literal),
    /// Binary operation: `left op right`.
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    /// Unary operation: `op expr` (e.g., NOT, -).
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expression>,
    },
    /// Scalar function call: `name(args)`.
    Function {
        name: String,
        args: Vec<Expression>,
        distinct: bool,
    },
    /// Aggregate function call.
    Aggregate {
        name: String,
        args: Vec<Expression>,
        distinct: bool,
    },
    /// Window function: `expr OVER (...)`.
    WindowFunction {
        function: Box<Expression>,
        window: WindowSpec,
    },
    /// CASE expression.
    Case {
        operand: Option<Box<Expression>>,
        when_clauses: Vec<(Expression, Expression)>,
        else_clause: Option<Box<Expression>>,
    },
    /// Subquery expression: `(SELECT ...)`.
    Subquery(Box<Query>),
    /// EXISTS (SELECT ...).
    Exists(Box<Query>),
    /// expr IN (values).
    InList {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    /// expr IN (SELECT ...).
    InSubquery {
        expr: Box<Expression>,
        subquery: Box<Query>,
        negated: bool,
    },
    /// expr BETWEEN low AND high.
    Between {
        expr: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
        negated: bool,
    },
    /// expr IS NULL / IS NOT NULL.
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    /// expr IS [NOT] TRUE / FALSE / UNKNOWN; `value: None` is UNKNOWN.
    IsTruth {
        expr: Box<Expression>,
        value: Option<bool>,
        negated: bool,
    },
    /// CAST(expr AS type).
    Cast {
        expr: Box<Expression>,
        data_type: String,
    },
    /// Wildcard `*` (used in COUNT(*)).
    Wildcard,
    /// Parameter placeholder: `?`, `$1`, `:name`.
    Parameter(String),
    /// Nested expression (parenthesized).
    Nested(Box<Expression>),
    /// A construct the parser had no node for, kept as source SQL.
    Raw(String),
}

/// Literal values in SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

/// Binary operators.
#[derive(Debug, Clone, PartialEq)]
pub enum BinaryOperator {
    // Comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    /// MySQL `<=>` and `IS NOT DISTINCT FROM`.
    NullSafeEq,
    IsDistinctFrom,
    // Logical
    And,
    Or,
    Xor,
    // Arithmetic
    Plus,
    Minus,
    Multiply,
    Divide,
    /// MySQL `DIV`.
    IntegerDivide,
    Modulo,
    // Bitwise
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    // String
    Like,
    ILike,
    NotLike,
    NotILike,
    RegexMatch,
    NotRegexMatch,
    // Other
    Concat,
}

/// Unary operators.
#[derive(Debug, Clone, PartialEq)]
pub enum UnaryOperator {
    Not,
    Minus,
    Plus,
}

/// Window specification for window functions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WindowSpec {
    pub partition_by: Vec<Expression>,
    pub order_by: Vec<OrderByExpr>,
    pub frame: Option<WindowFrame>,
}

/// Named window definition for WINDOW clause.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedWindowSpec {
    pub name: String,
    pub spec: WindowSpec,
}

/// Window frame specification.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowFrame {
    pub mode: WindowFrameMode,
    pub start: WindowFrameBound,
    pub end: Option<WindowFrameBound>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowFrameMode {
    Rows,
    Range,
    Groups,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowFrameBound {
    CurrentRow,
    Preceding(Option<u64>),
    Following(Option<u64>),
}

/// ORDER BY expression.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expression,
    pub asc: Option<bool>,
    pub nulls_first: Option<bool>,
}

impl Expression {
    pub fn column(name: impl Into<String>) -> Self {
        Expression::Column {
            table: None,
            name: name.into(),
        }
    }

    pub fn function(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Expression::Function {
            name: name.into(),
            args,
            distinct: false,
        }
    }
}
