//! Snapshot file format and atomic snapshot I/O.
//!
//! Snapshots are JSON documents with two top-level maps:
//!
//! ```json
//! {"gauges": {"temp": 72.3}, "counters": {"hits": 100}}
//! ```
//!
//! Writes go to `<path>.tmp` first and are renamed over the destination, so
//! a crash mid-write never leaves a truncated snapshot behind.

use crate::core::{MetricsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Point-in-time copy of every gauge and counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Gauge values by name
    #[serde(default)]
    pub gauges: BTreeMap<String, f64>,
    /// Counter values by name
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,
}

impl Snapshot {
    /// Number of gauges and counters.
    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len()
    }

    /// True when neither map has entries.
    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.counters.is_empty()
    }

    /// Names of gauges JSON cannot represent (NaN and infinities).
    pub fn non_finite_gauges(&self) -> Vec<&str> {
        self.gauges
            .iter()
            .filter(|(_, value)| !value.is_finite())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("snapshot"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write a snapshot atomically.
///
/// Creates the parent directory if it doesn't exist. A snapshot holding a
/// non-finite gauge is refused and the previous file is left in place, since
/// JSON would encode it as `null` and the file would no longer load.
pub async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let non_finite = snapshot.non_finite_gauges();
    if !non_finite.is_empty() {
        return Err(MetricsError::persistence(format!(
            "gauges {:?} are not finite and cannot be saved",
            non_finite
        )));
    }

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).await.map_err(|e| {
            MetricsError::persistence(format!("create {}: {}", dir.display(), e))
        })?;
    }

    let json = serde_json::to_vec(snapshot)?;
    let temp_path = temp_path(path);

    fs::write(&temp_path, &json).await.map_err(|e| {
        MetricsError::persistence(format!("write {}: {}", temp_path.display(), e))
    })?;

    fs::rename(&temp_path, path).await.map_err(|e| {
        MetricsError::persistence(format!("rename {}: {}", temp_path.display(), e))
    })?;

    tracing::debug!("Saved {} metrics to {:?}", snapshot.len(), path);
    Ok(())
}

/// Read and decode a snapshot.
pub async fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let bytes = fs::read(path)
        .await
        .map_err(|e| MetricsError::persistence(format!("read {}: {}", path.display(), e)))?;

    let snapshot = serde_json::from_slice(&bytes)?;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.gauges.insert("temp".to_string(), 72.3);
        snapshot.gauges.insert("Alloc".to_string(), 1_048_576.0);
        snapshot.counters.insert("PollCount".to_string(), 42);
        snapshot.counters.insert("errors".to_string(), -3);
        snapshot
    }

    #[tokio::test]
    async fn test_write_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metrics.json");

        write_snapshot(&path, &sample()).await.unwrap();
        assert_eq!(load_snapshot(&path).await.unwrap(), sample());
    }

    #[tokio::test]
    async fn test_write_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("metrics.json");

        write_snapshot(&path, &sample()).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metrics.json");

        write_snapshot(&path, &sample()).await.unwrap();
        write_snapshot(&path, &Snapshot::default()).await.unwrap();

        assert!(!temp_path(&path).exists());
        assert!(load_snapshot(&path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_format() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metrics.json");

        let mut snapshot = Snapshot::default();
        snapshot.gauges.insert("temp".to_string(), 72.3);
        snapshot.counters.insert("hits".to_string(), 100);
        write_snapshot(&path, &snapshot).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, r#"{"gauges":{"temp":72.3},"counters":{"hits":100}}"#);
    }

    #[tokio::test]
    async fn test_missing_sections_decode_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metrics.json");
        std::fs::write(&path, r#"{"counters":{"hits":7}}"#).unwrap();

        let snapshot = load_snapshot(&path).await.unwrap();
        assert!(snapshot.gauges.is_empty());
        assert_eq!(snapshot.counters.get("hits"), Some(&7));
    }

    #[tokio::test]
    async fn test_load_errors() {
        let temp_dir = TempDir::new().unwrap();

        let missing = load_snapshot(&temp_dir.path().join("absent.json")).await;
        assert!(matches!(missing, Err(MetricsError::Persistence(_))));

        let corrupt_path = temp_dir.path().join("corrupt.json");
        std::fs::write(&corrupt_path, "{\"gauges\": {\"temp\": ").unwrap();
        let corrupt = load_snapshot(&corrupt_path).await;
        assert!(matches!(corrupt, Err(MetricsError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_non_finite_gauge_keeps_previous_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metrics.json");
        write_snapshot(&path, &sample()).await.unwrap();

        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut snapshot = sample();
            snapshot.gauges.insert("bad".to_string(), bad);

            let result = write_snapshot(&path, &snapshot).await;
            assert!(matches!(result, Err(MetricsError::Persistence(_))));
            assert!(!temp_path(&path).exists());
            assert_eq!(load_snapshot(&path).await.unwrap(), sample());
        }
    }

    #[test]
    fn test_temp_path() {
        assert_eq!(
            temp_path(Path::new("/var/lib/tally/metrics.json")),
            PathBuf::from("/var/lib/tally/metrics.json.tmp")
        );
    }
}
