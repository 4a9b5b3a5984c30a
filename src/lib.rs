pub mod adapter;
pub mod ast;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod export;
pub mod relation;
pub mod session;

pub use adapter::{
    extract_comparison_conditions, Condition, ConditionOp, ConditionValue, MemoryTable,
    TableAdapter, TableRegistry,
};
pub use config::{AdapterConfig, EngineConfig, QueryConfig};
pub use engine::{AnalyticalEngine, DataFusionEngine, EngineOutput, EngineSession};
pub use error::{ErrorCategory, QueryError, Result};
pub use executor::{needs_text_workaround, PreparedQuery, QueryExecutor};
pub use relation::{Column, ColumnDescriptor, ColumnKind, Relation, TypeNormalizer, Value};
pub use session::QuerySession;
