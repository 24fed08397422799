//! Configuration management for tally.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Environment variable and CLI overrides (see `cli`)
//! - Validation and defaults

use crate::core::retry::RetryPolicy;
use crate::core::{MetricsError, Result};
use humantime_serde::Serde;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on configured retry delays.
const MAX_RETRY_DELAYS: usize = 16;

/// Complete configuration for tally
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Snapshot file for the in-memory store
    pub file_storage_path: Option<PathBuf>,
    /// Snapshot interval; zero saves after every write
    #[serde(with = "humantime_serde")]
    pub store_interval: Duration,
    /// Restore the snapshot at startup
    pub restore: bool,
    /// SQLite database file for the durable store
    pub database_path: Option<PathBuf>,
    /// How long a statement waits on a locked database
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
    /// Backoff delays for batch writes to the database
    pub retry_delays: Vec<Serde<Duration>>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Include targets, thread ids and line numbers
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including per-attempt retry detail
    Trace,
    /// Backend selection and snapshot saves
    Debug,
    /// Startup and shutdown
    Info,
    /// Retries and fallbacks
    Warn,
    /// Dropped writes and failed saves only
    Error,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            file_storage_path: Some(PathBuf::from("/tmp/metrics-db.json")),
            store_interval: Duration::from_secs(300),
            restore: true,
            database_path: None,
            busy_timeout: Duration::from_secs(5),
            retry_delays: RetryPolicy::default()
                .delays()
                .iter()
                .map(|d| Serde::from(*d))
                .collect(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl StorageConfig {
    /// Retry policy for batch writes built from `retry_delays`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_delays.iter().map(|d| **d).collect())
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let storage = &self.storage;

        if storage.retry_delays.len() > MAX_RETRY_DELAYS {
            return Err(MetricsError::config(format!(
                "retry_delays may list at most {} delays, got {}",
                MAX_RETRY_DELAYS,
                storage.retry_delays.len()
            )));
        }

        if storage.busy_timeout.is_zero() {
            return Err(MetricsError::config("busy_timeout must be greater than 0"));
        }

        if matches!(&storage.file_storage_path, Some(path) if path.as_os_str().is_empty()) {
            return Err(MetricsError::config("file_storage_path must not be empty"));
        }

        if matches!(&storage.database_path, Some(path) if path.as_os_str().is_empty()) {
            return Err(MetricsError::config("database_path must not be empty"));
        }

        Ok(())
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| MetricsError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set snapshot file path; `None` disables file persistence
    pub fn file_storage_path(mut self, path: Option<PathBuf>) -> Self {
        self.config.storage.file_storage_path = path;
        self
    }

    /// Set snapshot interval
    pub fn store_interval(mut self, interval: Duration) -> Self {
        self.config.storage.store_interval = interval;
        self
    }

    /// Restore snapshot at startup
    pub fn restore(mut self, restore: bool) -> Self {
        self.config.storage.restore = restore;
        self
    }

    /// Set database file
    pub fn database_path(mut self, path: PathBuf) -> Self {
        self.config.storage.database_path = Some(path);
        self
    }

    /// Set batch-write backoff delays
    pub fn retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.config.storage.retry_delays = delays.into_iter().map(Serde::from).collect();
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
