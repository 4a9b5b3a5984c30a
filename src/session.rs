/// Caller-side session context for a single query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySession {
    /// The caller's current database, if any.
    pub database: Option<String>,
}

impl QuerySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(database: impl Into<String>) -> Self {
        Self {
            database: Some(database.into()),
        }
    }
}
