//! Common test utilities and fixtures.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tally_lib::core::{MetricUpdate, RetryPolicy};
use tally_lib::storage::{DurableStorage, FileStorage, MemStorage, MetricsStorage, SnapshotSchedule};
use tempfile::TempDir;

/// A backend under test plus whatever keeps its files alive.
pub struct TestBackend {
    pub storage: Arc<dyn MetricsStorage>,
    pub file: Option<Arc<FileStorage>>,
    _dir: TempDir,
}

impl TestBackend {
    pub async fn shutdown(&self) {
        if let Some(file) = &self.file {
            file.shutdown().await.unwrap();
        }
    }
}

/// Every backend, each in its own temporary directory.
pub async fn all_backends() -> Vec<TestBackend> {
    vec![memory_backend(), file_backend().await, durable_backend()]
}

pub fn memory_backend() -> TestBackend {
    TestBackend {
        storage: Arc::new(MemStorage::new()),
        file: None,
        _dir: TempDir::new().unwrap(),
    }
}

pub async fn file_backend() -> TestBackend {
    let dir = TempDir::new().unwrap();
    let file = Arc::new(
        FileStorage::open(snapshot_path(&dir), SnapshotSchedule::Synchronous, false).await,
    );

    TestBackend {
        storage: Arc::clone(&file) as Arc<dyn MetricsStorage>,
        file: Some(file),
        _dir: dir,
    }
}

pub fn durable_backend() -> TestBackend {
    let dir = TempDir::new().unwrap();
    let storage = DurableStorage::open(dir.path().join("metrics.db"), fast_retry())
        .unwrap()
        .with_busy_timeout(Duration::from_secs(5))
        .unwrap();

    TestBackend {
        storage: Arc::new(storage),
        file: None,
        _dir: dir,
    }
}

pub fn snapshot_path(dir: &TempDir) -> PathBuf {
    dir.path().join("metrics.json")
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(vec![Duration::from_millis(10); 3])
}

/// A counter update that carries a value instead of a delta.
pub fn malformed_counter(name: &str) -> MetricUpdate {
    MetricUpdate {
        id: name.to_string(),
        mtype: "counter".to_string(),
        delta: None,
        value: Some(1.0),
    }
}
