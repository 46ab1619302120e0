/*!
 * Configuration types for Corral
 */

use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for a fleet manager process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Group whose members administer every controller
    #[serde(default)]
    pub controller_admin: String,

    /// Number of backing store sessions
    #[serde(default = "default_session_pool_size")]
    pub session_pool_size: usize,

    /// Maximum number of pub/sub handlers running at once
    #[serde(default = "default_pubsub_max_concurrency")]
    pub pubsub_max_concurrency: usize,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

/// Where documents are stored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file; in-memory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_session_pool_size() -> usize {
    4
}

fn default_pubsub_max_concurrency() -> usize {
    10
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            controller_admin: String::new(),
            session_pool_size: default_session_pool_size(),
            pubsub_max_concurrency: default_pubsub_max_concurrency(),
            database: DatabaseConfig::default(),
            log_level: LogLevel::default(),
            log_file: None,
            verbose: false,
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl FleetConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: FleetConfig = toml::from_str(&contents)
            .map_err(|e| FleetError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| FleetError::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.controller_admin.is_empty() {
            return Err(FleetError::Config(
                "no controller admin group specified".to_string(),
            ));
        }
        if self.session_pool_size == 0 {
            return Err(FleetError::Config(
                "session_pool_size must be at least 1".to_string(),
            ));
        }
        if self.pubsub_max_concurrency == 0 {
            return Err(FleetError::Config(
                "pubsub_max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: FleetConfig = toml::from_str("controller_admin = \"admins\"").unwrap();
        assert_eq!(config.session_pool_size, 4);
        assert_eq!(config.pubsub_max_concurrency, 10);
        assert_eq!(config.database.path, None);
        assert_eq!(config.log_level, LogLevel::Info);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_missing_admin() {
        let err = FleetConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("controller admin"));
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let config = FleetConfig {
            controller_admin: "admins".into(),
            session_pool_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corral.toml");
        let config = FleetConfig {
            controller_admin: "admins".into(),
            session_pool_size: 2,
            database: DatabaseConfig {
                path: Some(dir.path().join("corral.db")),
            },
            log_level: LogLevel::Debug,
            ..Default::default()
        };
        config.to_file(&path).unwrap();
        assert_eq!(FleetConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
