//! Read-through snapshot cache with a minimum re-read interval.
//!
//! A non-forced load inside the read interval waits out the rest of the
//! window and then returns the cached snapshot without touching the store.
//! A forced load, a load with an empty cache, or a load after the window
//! performs exactly one fresh read through the retry executor.
//!
//! The key specification is resolved to a header name by the first read and
//! that name is kept for later reads, so columns moving in the store do not
//! change which column keys rows. A layout change clears it.

use super::Snapshot;
use crate::config::TableConfig;
use crate::retry::RetryExecutor;
use crate::store::TableStore;
use crate::Result;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Cache statistics for monitoring.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Fresh reads from the store
    pub reads: AtomicU64,
    /// Loads answered from the cache
    pub hits: AtomicU64,
    /// Loads that waited for the read interval
    pub throttled: AtomicU64,
    /// Loads that bypassed the throttle
    pub forced: AtomicU64,
    /// Explicit invalidations
    pub invalidations: AtomicU64,
}

impl CacheStats {
    fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    fn record_forced(&self) {
        self.forced.fetch_add(1, Ordering::Relaxed);
    }

    fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }
}

struct Layout {
    config: TableConfig,
    /// Key header resolved from `config.key_spec` by the first read
    key_column: Option<String>,
    /// Bumped on every change so reads started under an older layout are not cached
    generation: u64,
}

/// Holds the latest [`Snapshot`] and throttles re-reads.
pub struct SnapshotCache {
    store: Arc<dyn TableStore>,
    retry: Arc<RetryExecutor>,
    read_interval: Duration,

    /// Lock order: `layout` before `current`
    layout: RwLock<Layout>,

    /// Latest snapshot, replaced wholesale on every read
    current: RwLock<Option<Arc<Snapshot>>>,

    /// Serializes fresh reads so concurrent misses share one store call
    refresh: Mutex<()>,

    stats: CacheStats,
}

impl SnapshotCache {
    /// Create an empty cache.
    pub fn new(
        store: Arc<dyn TableStore>,
        retry: Arc<RetryExecutor>,
        read_interval: Duration,
        layout: TableConfig,
    ) -> Self {
        Self {
            store,
            retry,
            read_interval,
            layout: RwLock::new(Layout {
                config: layout,
                key_column: None,
                generation: 0,
            }),
            current: RwLock::new(None),
            refresh: Mutex::new(()),
            stats: CacheStats::default(),
        }
    }

    /// Load the table, honoring the read throttle unless `force` is set.
    pub async fn load(&self, force: bool) -> Result<Arc<Snapshot>> {
        let requested_at = Instant::now();

        if force {
            self.stats.record_forced();
        } else if let Some(cached) = self.cached() {
            let age = requested_at.saturating_duration_since(cached.fetched_instant());
            if age < self.read_interval {
                let wait = self.read_interval - age;
                self.stats.record_throttled();
                debug!(wait_ms = wait.as_millis() as u64, "Read throttled");
                tokio::time::sleep(wait).await;
                if let Some(current) = self.cached() {
                    self.stats.record_hit();
                    return Ok(current);
                }
                debug!("Cache invalidated while throttled, reading fresh");
            }
        }

        let _guard = self.refresh.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if !force {
            if let Some(cached) = self.cached() {
                if cached.fetched_instant() >= requested_at {
                    self.stats.record_hit();
                    return Ok(cached);
                }
            }
        }

        self.read_fresh().await
    }

    async fn read_fresh(&self) -> Result<Arc<Snapshot>> {
        let store = &self.store;
        let grid = self.retry.run("load_grid", || store.load_grid()).await?;

        let (config, fixed_key, generation) = {
            let layout = self.layout.read();
            (
                layout.config.clone(),
                layout.key_column.clone(),
                layout.generation,
            )
        };
        let snapshot = Arc::new(match fixed_key.as_deref() {
            Some(key) => Snapshot::from_grid_with_key(grid, config.header_row, key)?,
            None => Snapshot::from_grid(grid, config.header_row, config.key_spec.as_deref())?,
        });
        self.stats.record_read();

        {
            let mut layout = self.layout.write();
            if layout.generation != generation {
                debug!("Layout changed during read, snapshot not cached");
                return Ok(snapshot);
            }

            match (fixed_key.as_deref(), snapshot.key_column()) {
                (None, Some(key)) => {
                    layout.key_column = Some(key.to_string());
                    info!(
                        key_column = key,
                        key_spec = config.key_spec.as_deref().unwrap_or_default(),
                        header_row = config.header_row,
                        "Key column resolved"
                    );
                }
                (Some(key), None) => {
                    warn!(
                        key_column = key,
                        "Key column no longer in headers, rows are not addressable by key"
                    );
                }
                _ => {}
            }

            *self.current.write() = Some(snapshot.clone());
        }

        debug!(
            rows = snapshot.len(),
            columns = snapshot.headers().len(),
            backend = self.store.backend_name(),
            "Snapshot refreshed"
        );
        Ok(snapshot)
    }

    /// Latest snapshot, if any, without touching the store.
    pub fn cached(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    /// Drop the cached snapshot so the next load reads fresh.
    pub fn invalidate(&self) {
        if self.current.write().take().is_some() {
            self.stats.record_invalidation();
            debug!("Snapshot cache invalidated");
        }
    }

    /// Current table layout.
    pub fn layout(&self) -> TableConfig {
        self.layout.read().config.clone()
    }

    /// Header the key specification resolved to, once a read has resolved it.
    pub fn key_column(&self) -> Option<String> {
        self.layout.read().key_column.clone()
    }

    /// Replace the table layout. Any change invalidates the cache and
    /// clears the resolved key column, so the next load re-resolves it with
    /// the new header row and key specification.
    pub fn set_layout(&self, config: TableConfig) {
        let mut layout = self.layout.write();
        if layout.config == config {
            return;
        }

        layout.config = config;
        layout.key_column = None;
        layout.generation += 1;
        if self.current.write().take().is_some() {
            self.stats.record_invalidation();
            debug!("Snapshot cache invalidated by layout change");
        }
    }

    /// Configured read interval.
    pub fn read_interval(&self) -> Duration {
        self.read_interval
    }

    /// Cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::store::{MemoryTableStore, TableTarget};

    async fn setup(read_interval_ms: u64) -> (Arc<MemoryTableStore>, SnapshotCache) {
        let store = Arc::new(MemoryTableStore::new(
            "Sheet1",
            vec![
                vec!["id", "status"],
                vec!["item001", "open"],
                vec!["item002", "done"],
            ],
        ));
        store
            .initialize(&TableTarget {
                credentials: None,
                table_id: "doc".into(),
                table_name: "Sheet1".into(),
            })
            .await
            .unwrap();

        let retry = Arc::new(RetryExecutor::new(
            RetryPolicy::new(3).with_base_delay(Duration::from_millis(10)),
        ));
        let cache = SnapshotCache::new(
            store.clone(),
            retry,
            Duration::from_millis(read_interval_ms),
            TableConfig::default(),
        );
        (store, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_load_reads() {
        let (store, cache) = setup(1000).await;
        assert!(cache.cached().is_none());

        let snapshot = cache.load(false).await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(store.load_calls(), 1);
        assert!(cache.cached().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_inside_interval_waits_and_reuses_cache() {
        let (store, cache) = setup(1000).await;
        let first = cache.load(false).await.unwrap();

        tokio::time::advance(Duration::from_millis(300)).await;
        let started = Instant::now();
        let second = cache.load(false).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.load_calls(), 1);
        assert_eq!(started.elapsed(), Duration::from_millis(700));
        assert_eq!(cache.stats().throttled.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_after_interval_reads_once() {
        let (store, cache) = setup(1000).await;
        let first = cache.load(false).await.unwrap();

        tokio::time::advance(Duration::from_millis(1001)).await;
        let second = cache.load(false).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(store.load_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_load_bypasses_throttle() {
        let (store, cache) = setup(1000).await;
        cache.load(false).await.unwrap();

        store.insert_row(4, vec!["item003", "new"]);
        let started = Instant::now();
        let fresh = cache.load(true).await.unwrap();

        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(store.load_calls(), 2);
        assert_eq!(fresh.row_position("item003"), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_retries_transient_failures() {
        let (store, cache) = setup(1000).await;
        store.fail_next_loads(2);

        let snapshot = cache.load(false).await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(store.load_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_exhaustion_surfaces() {
        let (store, cache) = setup(1000).await;
        store.fail_next_loads(3);

        let err = cache.load(true).await.unwrap_err();
        assert!(matches!(err, crate::Error::RetryExhausted { attempts: 3, .. }));
        assert_eq!(store.load_calls(), 3);
        assert!(cache.cached().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_layout_change_invalidates() {
        let (_store, cache) = setup(1000).await;
        cache.load(false).await.unwrap();

        cache.set_layout(TableConfig::default());
        assert!(cache.cached().is_some());

        cache.set_layout(TableConfig {
            key_spec: None,
            header_row: 2,
        });
        assert!(cache.cached().is_none());
        assert_eq!(cache.stats().invalidations.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_key_survives_column_moves() {
        let store = Arc::new(MemoryTableStore::new(
            "Sheet1",
            vec![vec!["name", "code"], vec!["alice", "K1"]],
        ));
        store
            .initialize(&TableTarget {
                credentials: None,
                table_id: "doc".into(),
                table_name: "Sheet1".into(),
            })
            .await
            .unwrap();
        let retry = Arc::new(RetryExecutor::new(RetryPolicy::new(3)));
        let cache = SnapshotCache::new(
            store.clone(),
            retry,
            Duration::from_millis(1000),
            TableConfig {
                key_spec: Some("B".into()),
                header_row: 1,
            },
        );

        assert_eq!(cache.load(true).await.unwrap().key_column(), Some("code"));
        assert_eq!(cache.key_column().as_deref(), Some("code"));

        // Swap the columns: "B" now points at "name"
        store.delete_row(1);
        store.delete_row(1);
        store.insert_row(1, vec!["code", "name"]);
        store.insert_row(2, vec!["K1", "alice"]);

        let moved = cache.load(true).await.unwrap();
        assert_eq!(moved.key_column(), Some("code"));
        assert_eq!(moved.row_position("K1"), Some(2));
        assert_eq!(moved.row_position("alice"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_load_reads_fresh_after_layout_change() {
        let (store, cache) = setup(1000).await;
        cache.load(false).await.unwrap();

        tokio::time::advance(Duration::from_millis(200)).await;
        let waiting = cache.load(false);
        tokio::pin!(waiting);
        // Let the load start its throttle sleep
        assert!(poll_once(&mut waiting).await.is_none());

        cache.set_layout(TableConfig {
            key_spec: Some("B".into()),
            header_row: 1,
        });
        let snapshot = waiting.await.unwrap();

        assert_eq!(snapshot.key_column(), Some("status"));
        assert_eq!(store.load_calls(), 2);
    }

    async fn poll_once<F: std::future::Future + Unpin>(fut: &mut F) -> Option<F::Output> {
        tokio::select! {
            biased;
            out = fut => Some(out),
            _ = std::future::ready(()) => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_spec_applies_on_next_read() {
        let (_store, cache) = setup(1000).await;
        let before = cache.load(false).await.unwrap();
        assert_eq!(before.key_column(), Some("id"));

        cache.set_layout(TableConfig {
            key_spec: Some("B".into()),
            header_row: 1,
        });
        // Inside the read interval, yet the invalidated cache reads fresh
        let after = cache.load(false).await.unwrap();
        assert_eq!(after.key_column(), Some("status"));
        assert_eq!(after.row_position("done"), Some(3));
    }
}
