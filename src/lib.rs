//! Tally - metrics storage and persistence.
//!
//! Tally stores gauges and counters reported by monitoring agents and keeps
//! them across restarts, either by snapshotting an in-memory store to a file
//! or by writing through to a transactional database.
//!
//! # Features
//!
//! - **Gauges and counters**: last-write-wins floats and accumulating integers
//! - **Atomic batches**: all-or-nothing batch writes with bounded retries
//! - **Snapshots**: periodic or per-write JSON snapshots, written atomically
//! - **Backend selection**: database, then snapshot file, then memory
//!
//! # Architecture
//!
//! - `core`: Domain types, configuration, errors and the retry policy
//! - `storage`: The storage contract and its backends
//! - `cli`: Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use tally_lib::core::StorageConfig;
//! use tally_lib::storage::select_backend;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = select_backend(&StorageConfig::default()).await?;
//!     let storage = backend.storage();
//!     storage.update_counter("PollCount", 1).await;
//!     println!("{}", storage.get_metric("counter", "PollCount").await?);
//!     backend.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cli;
pub mod core;
pub mod storage;

// Re-export core types for convenience
pub use crate::core::{Config, Result};
