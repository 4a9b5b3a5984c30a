//! Embedded analytical engine interface.
//!
//! The executor only needs four things from an engine: register a relation
//! under a name, run one SQL statement, unregister the relation and close
//! the session. Every call gets its own session so concurrent callers never
//! see each other's tables.
mod datafusion_engine;

use tracing::warn;

use crate::error::Result;
use crate::relation::Relation;

pub use datafusion_engine::{DataFusionEngine, DataFusionSession};

/// Result of a statement: the engine's own column labels plus the data.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    pub labels: Vec<String>,
    pub relation: Relation,
}

pub trait EngineSession {
    fn register(&mut self, name: &str, relation: Relation) -> Result<()>;
    fn execute(&mut self, sql: &str) -> Result<EngineOutput>;
    fn unregister(&mut self, name: &str) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

pub trait AnalyticalEngine: Send + Sync {
    type Session: EngineSession;

    /// Open a fresh, isolated session.
    fn open_session(&self) -> Result<Self::Session>;
}

/// A session with exactly one registered relation. Unregisters the relation
/// and closes the session when dropped, on every exit path.
pub struct ScopedSession<S: EngineSession> {
    session: S,
    table: String,
}

impl<S: EngineSession> ScopedSession<S> {
    pub fn open<E>(engine: &E, table: &str, relation: Relation) -> Result<Self>
    where
        E: AnalyticalEngine<Session = S>,
    {
        let mut session = engine.open_session()?;
        if let Err(err) = session.register(table, relation) {
            if let Err(close_err) = session.close() {
                warn!(error = %close_err, "failed to close engine session");
            }
            return Err(err);
        }
        Ok(Self {
            session,
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn execute(&mut self, sql: &str) -> Result<EngineOutput> {
        self.session.execute(sql)
    }
}

impl<S: EngineSession> Drop for ScopedSession<S> {
    fn drop(&mut self) {
        if let Err(err) = self.session.unregister(&self.table) {
            warn!(table = %self.table, error = %err, "failed to unregister relation");
        }
        if let Err(err) = self.session.close() {
            warn!(error = %err, "failed to close engine session");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Event, RecordingEngine};
    use super::*;

    #[test]
    fn test_scoped_session_tears_down_on_drop() {
        let engine = RecordingEngine::default();
        {
            let mut scoped = ScopedSession::open(&engine, "df_table", Relation::empty()).unwrap();
            assert_eq!(scoped.table(), "df_table");
            scoped.execute("SELECT 1").unwrap();
        }
        assert_eq!(
            engine.events(),
            vec![
                Event::Open,
                Event::Register("df_table".into(), Relation::empty()),
                Event::Execute("SELECT 1".into()),
                Event::Unregister("df_table".into()),
                Event::Close,
            ]
        );
    }

    #[test]
    fn test_scoped_session_tears_down_on_error() {
        let engine = RecordingEngine::failing();
        let result = ScopedSession::open(&engine, "t", Relation::empty())
            .and_then(|mut scoped| scoped.execute("SELECT nope"));
        assert!(result.is_err());
        let events = engine.events();
        assert_eq!(events[events.len() - 2], Event::Unregister("t".into()));
        assert_eq!(events[events.len() - 1], Event::Close);
    }

    #[test]
    fn test_failed_register_still_closes() {
        let engine = RecordingEngine {
            fail_register: true,
            ..Default::default()
        };
        assert!(ScopedSession::open(&engine, "t", Relation::empty()).is_err());
        assert_eq!(
            engine.events(),
            vec![
                Event::Open,
                Event::Register("t".into(), Relation::empty()),
                Event::Close,
            ]
        );
    }
}
