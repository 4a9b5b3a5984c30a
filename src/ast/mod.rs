/// Query tree and the passes that run over it.
///
/// ```text
/// SQL text (MySQL flavoured)
///       ↓
/// Parser                  (parser.rs)
///       ↓
/// Query tree              (types.rs)
///       ↓
/// Shape check             (analyze.rs)
///       ↓
/// Single-table rewrite    (rewriter.rs)
///       ↓
/// Engine SQL renderer     (compiler.rs)
/// ```
pub mod analyze;
pub mod compiler;
pub mod parser;
pub mod rewriter;
pub mod types;

// Re-export key types for convenience
pub use analyze::{analyze_query, QueryAnalysis};
pub use compiler::{compile, display_expr, render, render_with_fallback, RenderMode};
pub use parser::{parse_single, parse_single_with, parse_sql, parse_sql_with, SourceDialect};
pub use rewriter::{RewrittenQuery, Rewriter, DEFAULT_TABLE_ALIAS};
pub use types::*;
