use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ast::parser::SourceDialect;
use crate::ast::rewriter::DEFAULT_TABLE_ALIAS;
use crate::error::{QueryError, Result};
use crate::relation::DEFAULT_SAMPLE_SIZE;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Name the relation is registered under inside the engine.
    pub table_alias: String,
    pub sample_size: usize,
    pub dialect: SourceDialect,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            table_alias: DEFAULT_TABLE_ALIAS.to_string(),
            sample_size: DEFAULT_SAMPLE_SIZE,
            dialect: SourceDialect::MySql,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub worker_threads: usize,
    pub target_partitions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            target_partitions: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub query: QueryConfig,
    pub engine: EngineConfig,
}

impl AdapterConfig {
    pub fn get_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("framesql")
            .join("config.toml")
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        let path = Self::get_config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| QueryError::Config(format!("{}: {}", path.display(), e)))?;
        let config: AdapterConfig = toml::from_str(&content)
            .map_err(|e| QueryError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QueryError::Config(e.to_string()))?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| QueryError::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| QueryError::Config(e.to_string()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.table_alias.trim().is_empty() {
            return Err(QueryError::Config("query.table_alias must not be empty".into()));
        }
        if self.query.sample_size == 0 {
            return Err(QueryError::Config("query.sample_size must be at least 1".into()));
        }
        if self.engine.worker_threads == 0 {
            return Err(QueryError::Config(
                "engine.worker_threads must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
