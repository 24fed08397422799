//! Storage backends for metrics.
//!
//! This module provides the storage contract and its implementations:
//! a process-local store, the same store persisted to a snapshot file,
//! and a transactional SQLite store. `select_backend` picks one at startup.

pub mod backend;
pub mod durable;
pub mod file;
pub mod memory;
pub mod selector;
pub mod snapshot;

// Re-export commonly used types
pub use backend::{BackendKind, MetricsStorage};
pub use durable::DurableStorage;
pub use file::{FileStorage, SnapshotSchedule};
pub use memory::MemStorage;
pub use selector::{select_backend, SelectedBackend};
pub use snapshot::Snapshot;
