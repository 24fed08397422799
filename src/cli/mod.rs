//! Command-line interface for Tally.
//!
//! Just run `tally` to start with sensible defaults: metrics are kept in
//! memory and snapshotted to `/tmp/metrics-db.json` every five minutes.

use crate::core::config::ConfigBuilder;
use crate::core::{Config, MetricsError, Result};
use crate::storage::select_backend;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Metrics storage with snapshot and database persistence
#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Snapshot file for the in-memory store
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    pub file_storage_path: Option<PathBuf>,

    /// Snapshot interval in seconds (0 saves after every write)
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    pub store_interval: Option<u64>,

    /// Restore the snapshot at startup
    #[arg(short = 'r', long, env = "RESTORE")]
    pub restore: Option<bool>,

    /// SQLite database file; takes precedence over the snapshot file
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    pub database_dsn: Option<PathBuf>,

    /// Configuration file path (default: ~/.config/tally/config.yaml)
    #[arg(short, long, env = "TALLY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, env = "TALLY_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments and environment variables (highest priority)
    /// 2. Config file
    /// 3. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => path.clone(),
            None => {
                let default_path = dirs::config_dir()
                    .map(|d| d.join("tally").join("config.yaml"))
                    .unwrap_or_else(|| PathBuf::from("~/.config/tally/config.yaml"));

                if !default_path.exists() {
                    return self.build_config_from_args(builder);
                }
                default_path
            },
        };

        match tokio::fs::read_to_string(&config_path).await {
            Ok(content) => {
                builder = builder.from_yaml(&content)?;
            },
            Err(e) if self.config.is_some() => {
                // User explicitly specified a config file that doesn't exist
                return Err(MetricsError::config(format!(
                    "Failed to read config file {:?}: {}",
                    config_path, e
                )));
            },
            Err(_) => {},
        }

        self.build_config_from_args(builder)
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(path) = &self.file_storage_path {
            builder = builder.file_storage_path(Some(path.clone()));
        }
        if let Some(seconds) = self.store_interval {
            builder = builder.store_interval(Duration::from_secs(seconds));
        }
        if let Some(restore) = self.restore {
            builder = builder.restore(restore);
        }
        if let Some(path) = &self.database_dsn {
            builder = builder.database_path(path.clone());
        }

        builder.debug(self.debug).build()
    }

    /// Initialize logging based on configuration.
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let env_log_level = std::env::var("TALLY_LOG_LEVEL")
            .unwrap_or_else(|_| config.logging.level.as_str().to_string());
        let log_level = if config.debug {
            "debug"
        } else {
            env_log_level.as_str()
        };

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let fmt_layer = if config.logging.structured {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact()
        } else {
            tracing_subscriber::fmt::layer().with_target(false).compact()
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| MetricsError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute the Tally application.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;
    cli.init_logging(&config)?;

    if cli.check_config {
        let storage = &config.storage;
        println!("Configuration is valid!");
        println!("  Snapshot file: {:?}", storage.file_storage_path);
        println!("  Store interval: {:?}", storage.store_interval);
        println!("  Restore: {}", storage.restore);
        println!("  Database: {:?}", storage.database_path);
        println!("  Retry delays: {:?}", storage.retry_policy().delays());
        return Ok(());
    }

    let backend = select_backend(&config.storage).await?;
    let storage = backend.storage();
    storage.ping().await?;
    tracing::info!("Tally running with {} storage", backend.kind());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping...");

    backend.shutdown().await
}
