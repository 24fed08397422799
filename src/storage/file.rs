//! File-backed storage: an in-memory store with scheduled snapshots.
//!
//! Snapshots are taken by a background task, never from inside a mutating
//! call. In synchronous mode every mutation signals the task over a
//! single-slot channel; signals that arrive while a save is pending collapse
//! into that save.

use super::{BackendKind, MemStorage, MetricsStorage};
use crate::core::{MetricUpdate, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// When snapshots are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSchedule {
    /// Save every interval.
    Periodic(Duration),
    /// Save after every mutation.
    Synchronous,
}

impl SnapshotSchedule {
    /// A zero interval selects synchronous saving.
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            SnapshotSchedule::Synchronous
        } else {
            SnapshotSchedule::Periodic(interval)
        }
    }
}

/// Serializes snapshot writes to one path.
struct Saver {
    storage: Arc<MemStorage>,
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl Saver {
    async fn save(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.storage.save_snapshot(&self.path).await
    }

    async fn save_logged(&self) {
        if let Err(e) = self.save().await {
            tracing::error!("Failed to save metrics snapshot: {}", e);
        }
    }
}

/// In-memory metrics persisted to a snapshot file.
pub struct FileStorage {
    inner: Arc<MemStorage>,
    saver: Arc<Saver>,
    schedule: SnapshotSchedule,
    changes: Option<mpsc::Sender<()>>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FileStorage {
    /// Wrap `inner` and start the snapshot task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(inner: Arc<MemStorage>, path: PathBuf, schedule: SnapshotSchedule) -> Self {
        let shutdown = CancellationToken::new();
        tracing::info!("Persisting metrics to {:?} ({:?})", path, schedule);

        let saver = Arc::new(Saver {
            storage: Arc::clone(&inner),
            path,
            lock: tokio::sync::Mutex::new(()),
        });

        let (changes, worker) = match schedule {
            SnapshotSchedule::Periodic(interval) => {
                let worker =
                    tokio::spawn(run_periodic(Arc::clone(&saver), interval, shutdown.clone()));
                (None, worker)
            },
            SnapshotSchedule::Synchronous => {
                let (tx, rx) = mpsc::channel(1);
                let worker = tokio::spawn(run_on_change(Arc::clone(&saver), rx, shutdown.clone()));
                (Some(tx), worker)
            },
        };

        Self {
            inner,
            saver,
            schedule,
            changes,
            shutdown,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Create the store, restoring `path` first when `restore` is set.
    pub async fn open(path: PathBuf, schedule: SnapshotSchedule, restore: bool) -> Self {
        let inner = Arc::new(MemStorage::new());
        if restore {
            inner.restore_snapshot(&path).await;
        }
        Self::new(inner, path, schedule)
    }

    /// The in-memory store being snapshotted.
    pub fn inner(&self) -> &Arc<MemStorage> {
        &self.inner
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.saver.path
    }

    /// When snapshots are written.
    pub fn schedule(&self) -> SnapshotSchedule {
        self.schedule
    }

    /// Save a snapshot now.
    pub async fn save(&self) -> Result<()> {
        self.saver.save().await
    }

    /// Stop the snapshot task and write a final snapshot.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.await?;
        }

        self.save().await
    }

    fn changed(&self) {
        if let Some(changes) = &self.changes {
            match changes.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => {},
                Err(TrySendError::Closed(())) => {
                    tracing::debug!("Snapshot worker stopped, change not persisted");
                },
            }
        }
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_periodic(saver: Arc<Saver>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => saver.save_logged().await,
        }
    }
}

async fn run_on_change(
    saver: Arc<Saver>,
    mut changes: mpsc::Receiver<()>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            change = changes.recv() => match change {
                Some(()) => saver.save_logged().await,
                None => break,
            },
        }
    }
}

#[async_trait::async_trait]
impl MetricsStorage for FileStorage {
    async fn update_gauge(&self, name: &str, value: f64) {
        self.inner.set_gauge(name, value);
        self.changed();
    }

    async fn update_counter(&self, name: &str, delta: i64) {
        self.inner.add_counter(name, delta);
        self.changed();
    }

    async fn update_metrics_batch(&self, updates: &[MetricUpdate]) -> Result<()> {
        self.inner.apply_batch(updates)?;
        self.changed();
        Ok(())
    }

    async fn get_metric(&self, kind: &str, name: &str) -> Result<String> {
        self.inner.get_metric(kind, name).await
    }

    async fn get_all_metrics(&self) -> HashMap<String, String> {
        self.inner.listing()
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::File
    }
}
