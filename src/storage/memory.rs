//! In-memory storage backend for metrics.
//!
//! Gauges and counters live in two maps behind a single reader/writer lock,
//! so a batch applied under one write section is never observed half-done.
//! The lock is never held across an `.await`.

use super::snapshot::{self, Snapshot};
use super::{BackendKind, MetricsStorage};
use crate::core::{
    validate_batch, BatchItem, MetricKind, MetricUpdate, MetricValue, MetricsError, Result,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Default)]
struct MetricMaps {
    gauges: HashMap<String, f64>,
    counters: HashMap<String, i64>,
}

impl MetricMaps {
    fn apply(&mut self, item: BatchItem) {
        match item {
            BatchItem::Gauge { name, value } => {
                self.gauges.insert(name, value);
            },
            BatchItem::Counter { name, delta } => {
                let counter = self.counters.entry(name).or_insert(0);
                *counter = counter.wrapping_add(delta);
            },
        }
    }
}

/// Concurrent map-backed metrics store.
#[derive(Debug, Default)]
pub struct MemStorage {
    maps: RwLock<MetricMaps>,
}

impl MemStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store populated from a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let storage = Self::new();
        storage.replace(snapshot);
        storage
    }

    /// Overwrite a gauge.
    pub fn set_gauge(&self, name: &str, value: f64) {
        self.maps.write().gauges.insert(name.to_string(), value);
    }

    /// Accumulate a counter delta.
    pub fn add_counter(&self, name: &str, delta: i64) {
        let mut maps = self.maps.write();
        let counter = maps.counters.entry(name.to_string()).or_insert(0);
        *counter = counter.wrapping_add(delta);
    }

    /// Validate every update, then apply all of them under one write lock.
    ///
    /// A single invalid update rejects the whole batch and nothing is applied.
    pub fn apply_batch(&self, updates: &[MetricUpdate]) -> Result<usize> {
        let items = validate_batch(updates)?;
        let applied = items.len();

        let mut maps = self.maps.write();
        for item in items {
            maps.apply(item);
        }

        Ok(applied)
    }

    /// Look up a single metric.
    pub fn lookup(&self, kind: MetricKind, name: &str) -> Option<MetricValue> {
        let maps = self.maps.read();
        match kind {
            MetricKind::Gauge => maps.gauges.get(name).copied().map(MetricValue::Gauge),
            MetricKind::Counter => maps.counters.get(name).copied().map(MetricValue::Counter),
        }
    }

    /// Every metric as `name -> "kind: value"`; counters shadow same-named gauges.
    pub fn listing(&self) -> HashMap<String, String> {
        let maps = self.maps.read();
        let mut metrics = HashMap::with_capacity(maps.gauges.len() + maps.counters.len());

        for (name, value) in &maps.gauges {
            metrics.insert(name.clone(), MetricValue::Gauge(*value).listing());
        }
        for (name, value) in &maps.counters {
            metrics.insert(name.clone(), MetricValue::Counter(*value).listing());
        }

        metrics
    }

    /// Number of stored gauges and counters.
    pub fn len(&self) -> usize {
        let maps = self.maps.read();
        maps.gauges.len() + maps.counters.len()
    }

    /// True when no metric of either kind is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy both maps into a point-in-time snapshot.
    pub fn snapshot(&self) -> Snapshot {
        let maps = self.maps.read();
        Snapshot {
            gauges: maps.gauges.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            counters: maps.counters.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }

    /// Replace both maps with the snapshot contents.
    pub fn replace(&self, snapshot: Snapshot) {
        let gauges: HashMap<String, f64> = snapshot.gauges.into_iter().collect();
        let counters: HashMap<String, i64> = snapshot.counters.into_iter().collect();

        let mut maps = self.maps.write();
        maps.gauges = gauges;
        maps.counters = counters;
    }

    /// Write the current contents to `path` atomically.
    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        snapshot::write_snapshot(path, &snapshot).await
    }

    /// Restore the contents from `path`.
    ///
    /// Read or decode failures are logged and leave the store untouched.
    /// Returns whether the store was replaced.
    pub async fn restore_snapshot(&self, path: &Path) -> bool {
        match snapshot::load_snapshot(path).await {
            Ok(snapshot) => {
                let (gauges, counters) = (snapshot.gauges.len(), snapshot.counters.len());
                self.replace(snapshot);
                tracing::info!(
                    "Restored {} gauges and {} counters from {:?}",
                    gauges,
                    counters,
                    path
                );
                true
            },
            Err(e) => {
                tracing::warn!("Could not restore metrics from {:?}: {}", path, e);
                false
            },
        }
    }
}

#[async_trait::async_trait]
impl MetricsStorage for MemStorage {
    async fn update_gauge(&self, name: &str, value: f64) {
        self.set_gauge(name, value);
    }

    async fn update_counter(&self, name: &str, delta: i64) {
        self.add_counter(name, delta);
    }

    async fn update_metrics_batch(&self, updates: &[MetricUpdate]) -> Result<()> {
        self.apply_batch(updates).map(|_| ())
    }

    async fn get_metric(&self, kind: &str, name: &str) -> Result<String> {
        let kind = kind
            .parse::<MetricKind>()
            .map_err(|_| MetricsError::not_found(format!("{} {}", kind, name)))?;

        self.lookup(kind, name)
            .map(|value| value.render())
            .ok_or_else(|| MetricsError::not_found(format!("{} {}", kind, name)))
    }

    async fn get_all_metrics(&self) -> HashMap<String, String> {
        self.listing()
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }
}
