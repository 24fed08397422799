//! Database-backed metrics storage.
//!
//! Metrics live in two SQLite tables keyed by name. Single updates are one
//! upsert each; a batch is one transaction wrapped in the retry policy, so a
//! transient failure restarts the whole transaction from `BEGIN`.
//!
//! Counter accumulation wraps on overflow like the in-memory store, through
//! a `wrapping_add` SQL function registered on every connection. NaN gauges
//! are stored as NULL and read back as NaN.

use super::{BackendKind, MetricsStorage};
use crate::core::{
    BatchItem, MetricKind, MetricUpdate, MetricValue, MetricsError, Result, RetryPolicy,
};
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, ErrorCode, InterruptHandle, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS gauge_metrics (
        name TEXT PRIMARY KEY,
        value DOUBLE PRECISION
    );
    CREATE TABLE IF NOT EXISTS counter_metrics (
        name TEXT PRIMARY KEY,
        value BIGINT
    );
";

const UPSERT_GAUGE: &str = "
    INSERT INTO gauge_metrics (name, value)
    VALUES (?1, ?2)
    ON CONFLICT (name) DO UPDATE SET value = excluded.value";

const UPSERT_COUNTER: &str = "
    INSERT INTO counter_metrics (name, value)
    VALUES (?1, ?2)
    ON CONFLICT (name) DO UPDATE SET value = wrapping_add(counter_metrics.value, excluded.value)";

/// Create the metric tables if they don't exist.
pub fn initialize_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TABLES)?;
    Ok(())
}

/// Register `wrapping_add(a, b)`, two's-complement i64 addition.
///
/// SQLite's own `+` turns an overflowing integer sum into a REAL.
fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "wrapping_add",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| Ok(ctx.get::<i64>(0)?.wrapping_add(ctx.get::<i64>(1)?)),
    )?;
    Ok(())
}

fn gauge_column(row: &Row<'_>, index: usize) -> rusqlite::Result<f64> {
    Ok(row.get::<_, Option<f64>>(index)?.unwrap_or(f64::NAN))
}

/// An interrupted statement means the caller cancelled; other errors stand.
fn interrupted_as_cancelled(error: MetricsError) -> MetricsError {
    match error {
        MetricsError::Database(rusqlite::Error::SqliteFailure(ref err, _))
            if err.code == ErrorCode::OperationInterrupted =>
        {
            MetricsError::Cancelled
        },
        other => other,
    }
}

fn upsert(conn: &Connection, item: &BatchItem) -> Result<()> {
    match item {
        BatchItem::Gauge { name, value } => {
            conn.prepare_cached(UPSERT_GAUGE)?.execute(params![name, value])?;
        },
        BatchItem::Counter { name, delta } => {
            conn.prepare_cached(UPSERT_COUNTER)?.execute(params![name, delta])?;
        },
    }
    Ok(())
}

/// Apply every update inside one transaction.
///
/// Any failure returns before `commit`; dropping the transaction rolls it back.
fn apply_batch(conn: &mut Connection, updates: &[MetricUpdate]) -> Result<()> {
    let tx = conn.transaction()?;
    for (index, update) in updates.iter().enumerate() {
        upsert(&tx, &update.validate_at(index)?)?;
    }
    tx.commit()?;
    Ok(())
}

fn lookup(conn: &Connection, kind: MetricKind, name: &str) -> Result<Option<MetricValue>> {
    let value = match kind {
        MetricKind::Gauge => conn
            .query_row("SELECT value FROM gauge_metrics WHERE name = ?1", params![name], |row| {
                gauge_column(row, 0)
            })
            .optional()?
            .map(MetricValue::Gauge),
        MetricKind::Counter => conn
            .query_row("SELECT value FROM counter_metrics WHERE name = ?1", params![name], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?
            .map(MetricValue::Counter),
    };
    Ok(value)
}

/// Every readable row as `name -> "kind: value"`.
///
/// Rows that fail to decode are logged and left out of the listing.
fn listing(conn: &Connection) -> Result<HashMap<String, String>> {
    let mut metrics = HashMap::new();

    let mut stmt = conn.prepare("SELECT name, value FROM gauge_metrics")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, gauge_column(row, 1)?)))?;
    for row in rows {
        match row {
            Ok((name, value)) => {
                metrics.insert(name, MetricValue::Gauge(value).listing());
            },
            Err(e) => tracing::warn!("Skipping unreadable gauge row: {}", e),
        }
    }

    let mut stmt = conn.prepare("SELECT name, value FROM counter_metrics")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        match row {
            Ok((name, value)) => {
                metrics.insert(name, MetricValue::Counter(value).listing());
            },
            Err(e) => tracing::warn!("Skipping unreadable counter row: {}", e),
        }
    }

    Ok(metrics)
}

/// Transactional metrics store on SQLite.
pub struct DurableStorage {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    retry: RetryPolicy,
}

impl DurableStorage {
    /// Open (or create) the database at `path` and ensure the schema exists.
    ///
    /// The connection starts with rusqlite's 5 second busy timeout; see
    /// `with_busy_timeout`.
    pub fn open<P: AsRef<Path>>(path: P, retry: RetryPolicy) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn, retry)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(retry: RetryPolicy) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, retry)
    }

    fn from_connection(conn: Connection, retry: RetryPolicy) -> Result<Self> {
        initialize_tables(&conn)?;
        register_functions(&conn)?;
        let interrupt = Arc::new(conn.get_interrupt_handle());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
            retry,
        })
    }

    /// Set how long statements wait on a locked database before failing busy.
    pub fn with_busy_timeout(self, timeout: Duration) -> Result<Self> {
        self.conn.lock().busy_timeout(timeout)?;
        Ok(self)
    }

    /// Policy wrapped around batch writes.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut *conn)
        })
        .await?
    }

    /// Overwrite a gauge row.
    pub async fn upsert_gauge(&self, name: &str, value: f64) -> Result<()> {
        let item = BatchItem::Gauge {
            name: name.to_string(),
            value,
        };
        self.with_conn(move |conn| upsert(conn, &item)).await
    }

    /// Add `delta` to a counter row, wrapping on overflow.
    pub async fn upsert_counter(&self, name: &str, delta: i64) -> Result<()> {
        let item = BatchItem::Counter {
            name: name.to_string(),
            delta,
        };
        self.with_conn(move |conn| upsert(conn, &item)).await
    }

    /// Apply a batch atomically, giving up when `cancel` fires.
    ///
    /// Cancelling interrupts the running statement, which rolls the
    /// transaction back, and stops any further retries.
    pub async fn update_metrics_batch_with_cancel(
        &self,
        updates: &[MetricUpdate],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let updates: Arc<[MetricUpdate]> = updates.into();

        self.retry
            .run_with_cancel(cancel, || {
                let updates = Arc::clone(&updates);
                let conn = Arc::clone(&self.conn);
                let interrupt = Arc::clone(&self.interrupt);
                let cancel = cancel.clone();

                async move {
                    let mut task = tokio::task::spawn_blocking(move || {
                        let mut conn = conn.lock();
                        apply_batch(&mut *conn, &updates)
                    });

                    tokio::select! {
                        joined = &mut task => joined?,
                        _ = cancel.cancelled() => {
                            interrupt.interrupt();
                            // A batch that committed before the interrupt landed still counts.
                            task.await?.map_err(interrupted_as_cancelled)
                        },
                    }
                }
            })
            .await
    }
}

#[async_trait::async_trait]
impl MetricsStorage for DurableStorage {
    async fn update_gauge(&self, name: &str, value: f64) {
        if let Err(e) = self.upsert_gauge(name, value).await {
            tracing::error!("Error updating gauge metric {}: {}", name, e);
        }
    }

    async fn update_counter(&self, name: &str, delta: i64) {
        if let Err(e) = self.upsert_counter(name, delta).await {
            tracing::error!("Error updating counter metric {}: {}", name, e);
        }
    }

    async fn update_metrics_batch(&self, updates: &[MetricUpdate]) -> Result<()> {
        self.update_metrics_batch_with_cancel(updates, &CancellationToken::new())
            .await
    }

    async fn get_metric(&self, kind: &str, name: &str) -> Result<String> {
        let kind = kind
            .parse::<MetricKind>()
            .map_err(|_| MetricsError::not_found(format!("{} {}", kind, name)))?;
        let name = name.to_string();

        self.with_conn(move |conn| {
            lookup(conn, kind, &name)?
                .map(|value| value.render())
                .ok_or_else(|| MetricsError::not_found(format!("{} {}", kind, name)))
        })
        .await
    }

    async fn get_all_metrics(&self) -> HashMap<String, String> {
        match self.with_conn(|conn| listing(conn)).await {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::error!("Error listing metrics: {}", e);
                HashMap::new()
            },
        }
    }

    async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Database
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn storage() -> DurableStorage {
        DurableStorage::open_in_memory(RetryPolicy::new(Vec::new())).unwrap()
    }

    #[tokio::test]
    async fn test_single_upserts() {
        let storage = storage();

        storage.update_gauge("temp", 72.3).await;
        storage.update_gauge("temp", 70.1).await;
        storage.update_counter("hits", 5).await;
        storage.update_counter("hits", -2).await;

        let temp = storage.get_metric("gauge", "temp").await.unwrap();
        assert_eq!(temp, "70.100000");
        assert_eq!(temp.parse::<f64>().unwrap(), 70.1);
        assert_eq!(storage.get_metric("counter", "hits").await.unwrap(), "3");
    }

    #[tokio::test]
    async fn test_missing_metrics_are_not_found() {
        let storage = storage();

        for kind in ["gauge", "counter", "summary"] {
            assert!(matches!(
                storage.get_metric(kind, "missing").await,
                Err(MetricsError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_batch_commits_every_row() {
        let storage = storage();
        storage.update_counter("b", 10).await;

        storage
            .update_metrics_batch(&[MetricUpdate::gauge("a", 1.0), MetricUpdate::counter("b", 5)])
            .await
            .unwrap();

        assert_eq!(storage.get_metric("gauge", "a").await.unwrap(), "1.000000");
        assert_eq!(storage.get_metric("counter", "b").await.unwrap(), "15");
    }

    #[tokio::test]
    async fn test_malformed_item_rolls_back_batch() {
        let storage = storage();

        let batch = vec![
            MetricUpdate::gauge("a", 1.0),
            MetricUpdate {
                id: "b".to_string(),
                mtype: "counter".to_string(),
                delta: None,
                value: Some(5.0),
            },
        ];

        let result = storage.update_metrics_batch(&batch).await;
        assert!(matches!(result, Err(MetricsError::Validation(_))));
        assert!(storage.get_metric("gauge", "a").await.is_err());
        assert!(storage.get_metric("counter", "b").await.is_err());
        assert!(storage.get_all_metrics().await.is_empty());
    }

    #[tokio::test]
    async fn test_get_all_metrics() {
        let storage = storage();
        storage.update_gauge("gauge2", 99.9).await;
        storage.update_counter("counter2", 123).await;

        let expected: HashMap<String, String> = [
            ("gauge2".to_string(), "gauge: 99.900000".to_string()),
            ("counter2".to_string(), "counter: 123".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(storage.get_all_metrics().await, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_counter_updates() {
        let storage = Arc::new(storage());

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let storage = Arc::clone(&storage);
                tokio::spawn(async move { storage.update_counter("hits", 1).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(storage.get_metric("counter", "hits").await.unwrap(), "100");
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metrics.db");

        {
            let storage = DurableStorage::open(&path, RetryPolicy::new(Vec::new())).unwrap();
            storage.update_counter("hits", 7).await;
            storage.update_gauge("temp", 21.5).await;
        }

        let storage = DurableStorage::open(&path, RetryPolicy::new(Vec::new())).unwrap();
        assert_eq!(storage.get_metric("counter", "hits").await.unwrap(), "7");
        assert_eq!(storage.get_metric("gauge", "temp").await.unwrap(), "21.500000");
        assert!(storage.ping().await.is_ok());
        assert_eq!(storage.kind(), BackendKind::Database);
    }

    #[tokio::test]
    async fn test_cancelled_batch_writes_nothing() {
        let storage = storage();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = storage
            .update_metrics_batch_with_cancel(&[MetricUpdate::counter("hits", 1)], &cancel)
            .await;

        assert!(matches!(result, Err(MetricsError::Cancelled)));
        assert!(storage.get_metric("counter", "hits").await.is_err());
    }

    #[tokio::test]
    async fn test_batch_retried_while_database_locked() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metrics.db");
        let storage = DurableStorage::open(&path, RetryPolicy::new(vec![Duration::from_millis(50); 10]))
            .unwrap()
            .with_busy_timeout(Duration::from_millis(1))
            .unwrap();

        let blocker = Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN EXCLUSIVE;").unwrap();
        let release = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            blocker.execute_batch("COMMIT;").unwrap();
        });

        storage
            .update_metrics_batch(&[MetricUpdate::gauge("a", 1.0), MetricUpdate::counter("b", 5)])
            .await
            .unwrap();
        release.join().unwrap();

        assert_eq!(storage.get_metric("counter", "b").await.unwrap(), "5");
    }

    #[tokio::test]
    async fn test_batch_gives_up_after_retries() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metrics.db");
        let storage = DurableStorage::open(&path, RetryPolicy::new(vec![Duration::from_millis(5); 2]))
            .unwrap()
            .with_busy_timeout(Duration::from_millis(1))
            .unwrap();

        let blocker = Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN EXCLUSIVE;").unwrap();

        let result = storage.update_metrics_batch(&[MetricUpdate::counter("b", 5)]).await;
        match result {
            Err(MetricsError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }

        blocker.execute_batch("ROLLBACK;").unwrap();
        assert!(storage.get_metric("counter", "b").await.is_err());
    }

    #[tokio::test]
    async fn test_counter_wraps_on_overflow() {
        let storage = storage();

        storage.update_counter("big", i64::MAX).await;
        storage.update_counter("big", 1).await;
        assert_eq!(storage.get_metric("counter", "big").await.unwrap(), i64::MIN.to_string());

        storage
            .update_metrics_batch(&[MetricUpdate::counter("big", -1)])
            .await
            .unwrap();
        assert_eq!(storage.get_metric("counter", "big").await.unwrap(), i64::MAX.to_string());
        assert_eq!(
            storage.get_all_metrics().await["big"],
            format!("counter: {}", i64::MAX)
        );
    }

    #[tokio::test]
    async fn test_nan_gauge_reads_back() {
        let storage = storage();
        storage.update_counter("hits", 5).await;
        storage.update_gauge("ok", 1.0).await;
        storage.update_gauge("bad", f64::NAN).await;

        assert_eq!(storage.get_metric("gauge", "bad").await.unwrap(), "NaN");

        let metrics = storage.get_all_metrics().await;
        assert_eq!(metrics.len(), 3);
        assert_eq!(metrics["ok"], "gauge: 1.000000");
        assert_eq!(metrics["hits"], "counter: 5");
        assert_eq!(metrics["bad"], "gauge: NaN");
    }

    #[tokio::test]
    async fn test_listing_skips_unreadable_rows() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("metrics.db");
        let storage = DurableStorage::open(&path, RetryPolicy::new(Vec::new())).unwrap();
        storage.update_counter("hits", 5).await;
        storage.update_gauge("ok", 1.0).await;

        let other = Connection::open(&path).unwrap();
        other
            .execute("INSERT INTO counter_metrics (name, value) VALUES ('legacy', 1.5)", [])
            .unwrap();

        let metrics = storage.get_all_metrics().await;
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics["hits"], "counter: 5");
        assert_eq!(metrics["ok"], "gauge: 1.000000");
    }

    #[test]
    fn test_only_interrupts_become_cancelled() {
        let interrupted = MetricsError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
            None,
        ));
        assert!(matches!(interrupted_as_cancelled(interrupted), MetricsError::Cancelled));

        let constraint = MetricsError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        ));
        assert!(matches!(interrupted_as_cancelled(constraint), MetricsError::Database(_)));

        let invalid = MetricsError::validation("item 1: counter 'b' has no delta");
        assert!(matches!(interrupted_as_cancelled(invalid), MetricsError::Validation(_)));
    }
}
