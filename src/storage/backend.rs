//! Storage contract shared by every metrics backend.

use crate::core::{MetricUpdate, Result};
use std::collections::HashMap;
use std::fmt;

/// Which concrete backend is serving requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Process-local maps, lost on exit.
    Memory,
    /// Process-local maps snapshotted to a file.
    File,
    /// Transactional database.
    Database,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Database => "database",
        };
        f.write_str(name)
    }
}

/// Trait for metrics storage implementations.
///
/// All methods take `&self`; implementations synchronize internally and
/// may be shared between tasks behind an `Arc`.
#[async_trait::async_trait]
pub trait MetricsStorage: Send + Sync {
    /// Overwrite a gauge.
    async fn update_gauge(&self, name: &str, value: f64);

    /// Add a signed delta to a counter, starting from zero.
    async fn update_counter(&self, name: &str, delta: i64);

    /// Apply a batch of mixed gauge and counter updates.
    async fn update_metrics_batch(&self, updates: &[MetricUpdate]) -> Result<()>;

    /// Get the storage rendering of a metric value.
    ///
    /// `kind` is the metric type string; unknown kinds are reported as not found.
    async fn get_metric(&self, kind: &str, name: &str) -> Result<String>;

    /// Get every metric as `name -> "kind: value"`.
    async fn get_all_metrics(&self) -> HashMap<String, String>;

    /// Check the backend is reachable.
    async fn ping(&self) -> Result<()>;

    /// Backend identity for logging and diagnostics.
    fn kind(&self) -> BackendKind;
}
