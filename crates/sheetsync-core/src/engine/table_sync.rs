//! Lifecycle controller and the operations exposed to callers.
//!
//! Startup order is store, then key resolution through the first snapshot
//! read, then the writer. Shutdown stops batch scheduling and drains the
//! queue with one final flush.

use crate::config::{Config, TableConfig};
use crate::health::{component, HealthCheck};
use crate::metrics::SyncMetrics;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::snapshot::{Condition, Record, Snapshot, SnapshotCache};
use crate::store::{TableStore, TableTarget};
use crate::writer::{BatchWriter, FlushOutcome, PendingWrite};
use crate::{Error, Result, StoreError};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Separator used by [`TableSync::append_value`] when none is given.
pub const DEFAULT_APPEND_SEPARATOR: &str = "\n";

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Result of a key lookup. A missing key is a value, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(Record),
    NotFound,
}

/// Outcome of shutting down.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainReport {
    /// What the final flush applied
    pub flushed: FlushOutcome,
    /// Writes that never reached the store
    pub undelivered: Vec<PendingWrite>,
    /// Failure of the final flush, if any
    pub error: Option<String>,
}

impl DrainReport {
    /// Whether every queued write was delivered or deliberately dropped.
    pub fn is_clean(&self) -> bool {
        self.undelivered.is_empty() && self.error.is_none()
    }
}

/// Compose an appended cell value.
///
/// An empty current value yields `value` alone, with no leading separator.
pub fn compose_append(current: &str, value: &str, separator: &str) -> String {
    if current.is_empty() {
        value.to_string()
    } else {
        format!("{current}{separator}{value}")
    }
}

/// Shared-table synchronization engine.
pub struct TableSync {
    config: Config,
    store: Arc<dyn TableStore>,
    retry: Arc<RetryExecutor>,
    cache: Arc<SnapshotCache>,
    writer: Arc<BatchWriter>,
    metrics: Arc<SyncMetrics>,
    health: Arc<HealthCheck>,
    state: RwLock<LifecycleState>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TableSync {
    /// Initialize the store, resolve the key column and start accepting
    /// operations.
    pub async fn start(config: Config, store: Arc<dyn TableStore>) -> Result<Arc<Self>> {
        config.validate()?;

        let health = Arc::new(HealthCheck::new());
        let metrics = Arc::new(SyncMetrics::new());
        let retry = Arc::new(RetryExecutor::new(RetryPolicy::from(&config.sync)));

        info!(
            backend = store.backend_name(),
            table_id = %config.store.table_id,
            table = %config.store.table_name,
            state = %LifecycleState::Starting,
            "Starting table sync"
        );

        let target = TableTarget::from(&config.store);
        let init = retry
            .run("initialize", || store.initialize(&target))
            .await;
        if let Err(e) = init {
            health.mark_unhealthy(component::STORE, &e.to_string());
            return Err(match e {
                Error::Store(StoreError::TableNotFound(name)) => Error::StoreUnavailable(format!(
                    "table '{}' not found in '{}'",
                    name, config.store.table_id
                )),
                other => other,
            });
        }
        health.mark_healthy(component::STORE);

        let cache = Arc::new(SnapshotCache::new(
            store.clone(),
            retry.clone(),
            config.sync.read_interval(),
            config.table.clone(),
        ));

        // First read resolves the key column
        let snapshot = match cache.load(true).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                health.mark_unhealthy(component::CACHE, &e.to_string());
                return Err(e);
            }
        };
        health.mark_healthy(component::CACHE);

        let writer = Arc::new(BatchWriter::new(
            store.clone(),
            cache.clone(),
            retry.clone(),
            config.sync.batch_interval(),
            metrics.clone(),
            health.clone(),
        ));
        health.mark_healthy(component::WRITER);

        let (shutdown_tx, _) = broadcast::channel(1);
        let sync = Arc::new(Self {
            config,
            store,
            retry,
            cache,
            writer,
            metrics,
            health,
            state: RwLock::new(LifecycleState::Running),
            shutdown_tx,
        });
        sync.health.set_ready(true);

        info!(
            key_column = snapshot.key_column().unwrap_or_default(),
            headers = snapshot.headers().len(),
            rows = snapshot.len(),
            state = %LifecycleState::Running,
            "Table sync running"
        );
        Ok(sync)
    }

    /// Change the key specification and/or header row.
    ///
    /// Fails with [`Error::InvalidConfig`] for a header row below 1. The
    /// new layout applies from the next read.
    pub fn configure(&self, key_spec: Option<String>, header_row: Option<u32>) -> Result<TableConfig> {
        let mut layout = self.cache.layout();
        if let Some(spec) = key_spec {
            layout.key_spec = Some(spec);
        }
        if let Some(row) = header_row {
            layout.header_row = row;
        }
        layout.validate()?;

        info!(
            key_spec = layout.key_spec.as_deref().unwrap_or_default(),
            header_row = layout.header_row,
            "Table layout configured"
        );
        self.cache.set_layout(layout.clone());
        Ok(layout)
    }

    /// Keys of rows matching every condition, in row order.
    pub async fn query(&self, conditions: &[Condition], limit: Option<usize>) -> Result<Vec<String>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.query(conditions, limit))
    }

    /// Full row for `key`.
    pub async fn get(&self, key: &str) -> Result<Lookup> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.record(key).map_or(Lookup::NotFound, Lookup::Found))
    }

    /// Queue a deferred write.
    pub fn update(&self, key: &str, column: &str, value: &str) -> Result<()> {
        self.ensure_writable()?;
        self.writer.enqueue(PendingWrite::new(key, column, value));
        Ok(())
    }

    /// Write one cell immediately.
    pub async fn flush(&self, key: &str, column: &str, value: &str) -> Result<FlushOutcome> {
        self.ensure_writable()?;
        self.writer
            .flush_now(vec![PendingWrite::new(key, column, value)])
            .await
    }

    /// Append `value` to the cell's current value and queue the result.
    ///
    /// The current value comes from the cached snapshot, not a fresh read.
    /// Returns the composed value.
    pub async fn append_value(
        &self,
        key: &str,
        column: &str,
        value: &str,
        separator: Option<&str>,
    ) -> Result<String> {
        self.ensure_writable()?;

        let snapshot = match self.cache.cached() {
            Some(snapshot) => snapshot,
            None => self.snapshot().await?,
        };
        let current = snapshot.value(key, column).unwrap_or_default();
        let composed = compose_append(
            current,
            value,
            separator.unwrap_or(DEFAULT_APPEND_SEPARATOR),
        );

        self.writer
            .enqueue(PendingWrite::new(key, column, composed.clone()));
        Ok(composed)
    }

    /// Stop scheduling batches and flush the queue once.
    ///
    /// Never fails: a failed final flush is reported in the returned
    /// [`DrainReport`] and the lifecycle still reaches `Stopped`.
    pub async fn shutdown(&self) -> DrainReport {
        {
            let mut state = self.state.write();
            match *state {
                LifecycleState::Draining | LifecycleState::Stopped => {
                    warn!(state = %*state, "Shutdown already in progress");
                    return DrainReport::default();
                }
                _ => *state = LifecycleState::Draining,
            }
        }

        info!(
            pending = self.writer.pending_len(),
            state = %LifecycleState::Draining,
            "Draining"
        );
        self.health.set_ready(false);
        let _ = self.shutdown_tx.send(());

        let mut report = match self.writer.drain().await {
            Ok(flushed) => DrainReport {
                flushed,
                ..DrainReport::default()
            },
            Err(e) => DrainReport {
                undelivered: e.undelivered().to_vec(),
                error: Some(e.to_string()),
                ..DrainReport::default()
            },
        };

        // Writes that raced in after the final swap
        let leftover = self.writer.pending();
        if !leftover.is_empty() {
            error!(
                count = leftover.len(),
                writes = %serde_json::to_string(&leftover).unwrap_or_default(),
                "Writes arrived after the final flush"
            );
            report.undelivered.extend(leftover);
        }

        *self.state.write() = LifecycleState::Stopped;
        self.sync_metrics();
        info!(
            applied = report.flushed.applied,
            undelivered = report.undelivered.len(),
            state = %LifecycleState::Stopped,
            "Table sync stopped"
        );
        report
    }

    async fn snapshot(&self) -> Result<Arc<Snapshot>> {
        match self.cache.load(false).await {
            Ok(snapshot) => {
                self.health.mark_healthy(component::CACHE);
                Ok(snapshot)
            }
            Err(e) => {
                self.health.mark_degraded(component::CACHE, &e.to_string());
                Err(e)
            }
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        match *self.state.read() {
            LifecycleState::Stopped => Err(Error::Shutdown),
            _ => Ok(()),
        }
    }

    fn sync_metrics(&self) {
        let cache = self.cache.stats();
        self.metrics.sync_reads(
            cache.reads.load(Ordering::Relaxed),
            cache.throttled.load(Ordering::Relaxed),
        );
        let retry = self.retry.stats();
        self.metrics.sync_retries(
            retry.retries.load(Ordering::Relaxed),
            retry.exhausted.load(Ordering::Relaxed),
        );
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// Prometheus text for every metric.
    pub fn export_metrics(&self) -> String {
        self.sync_metrics();
        self.metrics.export_prometheus_text()
    }

    /// Subscribe to the start of draining.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    pub fn health(&self) -> &Arc<HealthCheck> {
        &self.health
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn writer(&self) -> &Arc<BatchWriter> {
        &self.writer
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StoreBackend, StoreConfig};
    use crate::snapshot::CompareOp;
    use crate::store::MemoryTableStore;
    use std::time::Duration;

    fn config() -> Config {
        let mut config = Config::new(StoreConfig::new(StoreBackend::Memory, "doc", "Sheet1"));
        config.sync.retry_base_delay_ms = 100;
        config
    }

    fn store() -> Arc<MemoryTableStore> {
        Arc::new(MemoryTableStore::new(
            "Sheet1",
            vec![
                vec!["id", "name", "status", "lock"],
                vec!["item001", "", "未処理", ""],
                vec!["item002", "", "処理済", ""],
            ],
        ))
    }

    #[test]
    fn test_compose_append() {
        assert_eq!(compose_append("", "first", "\n"), "first");
        assert_eq!(compose_append("a", "b", "\n"), "a\nb");
        assert_eq!(compose_append("a", "b", ", "), "a, b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_reaches_running() {
        let store = store();
        let sync = TableSync::start(config(), store.clone()).await.unwrap();
        assert_eq!(sync.state(), LifecycleState::Running);
        assert!(sync.health().is_ready());
        assert_eq!(store.load_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_missing_table_is_store_unavailable() {
        let mut config = config();
        config.store.table_name = "Other".into();
        let err = TableSync::start(config, store()).await.err().unwrap();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_and_get() {
        let sync = TableSync::start(config(), store()).await.unwrap();

        let keys = sync
            .query(&[Condition::new("status", CompareOp::Eq, "未処理")], None)
            .await
            .unwrap();
        assert_eq!(keys, vec!["item001"]);

        assert_eq!(sync.get("item003").await.unwrap(), Lookup::NotFound);
        match sync.get("item002").await.unwrap() {
            Lookup::Found(record) => assert_eq!(record.get("status"), Some("処理済")),
            Lookup::NotFound => panic!("item002 should exist"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_rejects_header_row_zero() {
        let sync = TableSync::start(config(), store()).await.unwrap();
        let err = sync.configure(None, Some(0)).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(sync.cache().layout().header_row, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_key_spec() {
        let sync = TableSync::start(config(), store()).await.unwrap();
        sync.configure(Some("C".into()), None).unwrap();

        let keys = sync.query(&[], None).await.unwrap();
        assert_eq!(keys, vec!["未処理", "処理済"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_value_composes_from_cache() {
        let store = store();
        let sync = TableSync::start(config(), store.clone()).await.unwrap();

        let first = sync
            .append_value("item001", "name", "alpha", None)
            .await
            .unwrap();
        assert_eq!(first, "alpha");

        let second = sync
            .append_value("item001", "status", "retry", Some(" / "))
            .await
            .unwrap();
        assert_eq!(second, "未処理 / retry");
        assert_eq!(sync.writer().pending_len(), 2);
        assert_eq!(store.load_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_then_writes_rejected() {
        let store = store();
        let sync = TableSync::start(config(), store.clone()).await.unwrap();
        sync.update("item001", "lock", "agent-1").unwrap();

        let report = sync.shutdown().await;
        assert!(report.is_clean());
        assert_eq!(report.flushed.applied, 1);
        assert_eq!(sync.state(), LifecycleState::Stopped);
        assert_eq!(store.cell(2, 3).as_deref(), Some("agent-1"));

        assert!(matches!(
            sync.update("item001", "lock", ""),
            Err(Error::Shutdown)
        ));
        // Reads stay available
        assert!(sync.get("item001").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_failure_still_stops() {
        let store = store();
        let sync = TableSync::start(config(), store.clone()).await.unwrap();
        sync.update("item001", "status", "x").unwrap();
        sync.update("item002", "status", "y").unwrap();
        store.fail_next_applies(3);

        let report = sync.shutdown().await;
        assert_eq!(report.undelivered.len(), 2);
        assert!(report.error.is_some());
        assert_eq!(sync.state(), LifecycleState::Stopped);
        assert_eq!(store.apply_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_metrics() {
        let sync = TableSync::start(config(), store()).await.unwrap();
        sync.flush("item001", "lock", "x").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let text = sync.export_metrics();
        assert!(text.contains("sheetsync_reads_total 2"));
        assert!(text.contains("sheetsync_flushes_total{kind=\"immediate\"} 1"));
    }
}
