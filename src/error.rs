use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Categorized error types for query failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The SQL text could not be parsed.
    Syntax,
    /// The query or engine output broke the single-table contract.
    Contract,
    /// The query could not be rendered for the engine dialect.
    Render,
    /// The input relation is malformed.
    Data,
    /// The embedded engine rejected or failed to run the query.
    Execution,
    /// A table adapter failed or no adapter matched.
    Adapter,
    /// Configuration could not be loaded.
    Config,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Contract => write!(f, "Contract Violation"),
            ErrorCategory::Render => write!(f, "Render Error"),
            ErrorCategory::Data => write!(f, "Data Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Adapter => write!(f, "Adapter Error"),
            ErrorCategory::Config => write!(f, "Configuration Error"),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("SQL parse error: {0}")]
    Parse(String),

    #[error("only 'SELECT from TABLE' statements are supported for internal queries: {0}")]
    Unsupported(String),

    #[error("cannot render query for the engine dialect: {0}")]
    Render(String),

    #[error("invalid relation: {0}")]
    InvalidRelation(String),

    #[error("engine returned {actual} columns but the query requested {expected}")]
    ColumnMismatch { expected: usize, actual: usize },

    #[error("engine execution failed: {0}")]
    Engine(#[source] Box<dyn StdError + Send + Sync>),

    #[error("no table adapter registered for '{0}'")]
    UnknownTable(String),

    #[error("table adapter error: {0}")]
    Adapter(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl QueryError {
    pub fn engine<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        QueryError::Engine(err.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            QueryError::Parse(_) => ErrorCategory::Syntax,
            QueryError::Unsupported(_) | QueryError::ColumnMismatch { .. } => {
                ErrorCategory::Contract
            }
            QueryError::Render(_) => ErrorCategory::Render,
            QueryError::InvalidRelation(_) => ErrorCategory::Data,
            QueryError::Engine(_) => ErrorCategory::Execution,
            QueryError::UnknownTable(_) | QueryError::Adapter(_) => ErrorCategory::Adapter,
            QueryError::Config(_) => ErrorCategory::Config,
        }
    }

    /// Format as a two-line string: category header, then the message.
    pub fn display_full(&self) -> String {
        let mut lines = vec![format!("{}: {}", self.category(), self)];
        let mut source = self.source();
        while let Some(cause) = source {
            lines.push(format!("  Caused by: {}", cause));
            source = cause.source();
        }
        lines.join("\n")
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Syntax.to_string(), "Syntax Error");
        assert_eq!(ErrorCategory::Contract.to_string(), "Contract Violation");
        assert_eq!(ErrorCategory::Execution.to_string(), "Execution Error");
        assert_eq!(ErrorCategory::Config.to_string(), "Configuration Error");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            QueryError::Parse("x".into()).category(),
            ErrorCategory::Syntax
        );
        assert_eq!(
            QueryError::ColumnMismatch {
                expected: 1,
                actual: 2
            }
            .category(),
            ErrorCategory::Contract
        );
        assert_eq!(
            QueryError::engine("boom").category(),
            ErrorCategory::Execution
        );
    }

    #[test]
    fn test_engine_error_keeps_source() {
        let err = QueryError::engine(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(err.source().is_some());
        let full = err.display_full();
        assert!(full.starts_with("Execution Error: engine execution failed: disk"));
        assert!(full.contains("Caused by: disk"));
    }

    #[test]
    fn test_column_mismatch_message() {
        let err = QueryError::ColumnMismatch {
            expected: 2,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "engine returned 3 columns but the query requested 2"
        );
    }
}
