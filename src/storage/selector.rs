//! Startup backend selection.

use super::{BackendKind, DurableStorage, FileStorage, MemStorage, MetricsStorage, SnapshotSchedule};
use crate::core::{Result, StorageConfig};
use std::path::Path;
use std::sync::Arc;

/// The backend chosen at startup.
pub struct SelectedBackend {
    storage: Arc<dyn MetricsStorage>,
    file: Option<Arc<FileStorage>>,
}

impl SelectedBackend {
    /// Shared handle to the chosen backend.
    pub fn storage(&self) -> Arc<dyn MetricsStorage> {
        Arc::clone(&self.storage)
    }

    /// Which backend won selection.
    pub fn kind(&self) -> BackendKind {
        self.storage.kind()
    }

    /// Flush whatever the backend still holds in memory.
    ///
    /// The file-backed store writes a final snapshot; the others have nothing
    /// to flush.
    pub async fn shutdown(&self) -> Result<()> {
        match &self.file {
            Some(file) => file.shutdown().await,
            None => Ok(()),
        }
    }
}

async fn open_database(path: &Path, config: &StorageConfig) -> Result<DurableStorage> {
    let storage =
        DurableStorage::open(path, config.retry_policy())?.with_busy_timeout(config.busy_timeout)?;
    storage.ping().await?;
    Ok(storage)
}

/// Pick exactly one backend: reachable database, then snapshot file, then memory.
///
/// A database that cannot be opened is logged and skipped. There is no
/// failover after this returns.
pub async fn select_backend(config: &StorageConfig) -> Result<SelectedBackend> {
    if let Some(path) = &config.database_path {
        match open_database(path, config).await {
            Ok(storage) => {
                tracing::info!("Using database storage at {:?}", path);
                return Ok(SelectedBackend {
                    storage: Arc::new(storage),
                    file: None,
                });
            },
            Err(e) => {
                tracing::warn!("Database at {:?} unavailable, falling back: {}", path, e);
            },
        }
    }

    if let Some(path) = &config.file_storage_path {
        let schedule = SnapshotSchedule::from_interval(config.store_interval);
        let file = Arc::new(FileStorage::open(path.clone(), schedule, config.restore).await);
        tracing::info!("Using file storage at {:?}", path);

        let storage = Arc::clone(&file) as Arc<dyn MetricsStorage>;
        return Ok(SelectedBackend {
            storage,
            file: Some(file),
        });
    }

    tracing::info!("Using in-memory storage");
    Ok(SelectedBackend {
        storage: Arc::new(MemStorage::new()),
        file: None,
    })
}
