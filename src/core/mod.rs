//! Core domain types, configuration and error handling for tally.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder, LogLevel, StorageConfig};
pub use error::{MetricsError, Result};
pub use retry::RetryPolicy;
pub use types::{validate_batch, BatchItem, MetricKind, MetricUpdate, MetricValue};
