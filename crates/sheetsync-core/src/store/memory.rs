//! In-process table store.

use super::{CellValue, CellWrite, Grid, StoreResult, TableStore, TableTarget};
use crate::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Table store backed by an in-memory grid.
///
/// Counts every call and can be told to fail the next N loads or applies,
/// which makes it the backend of choice for exercising retry and drain paths.
pub struct MemoryTableStore {
    table_name: String,
    grid: Mutex<Vec<Vec<CellValue>>>,
    initialized: AtomicBool,
    load_calls: AtomicU64,
    apply_calls: AtomicU64,
    fail_loads: AtomicU32,
    fail_applies: AtomicU32,
    applied: Mutex<Vec<Vec<CellWrite>>>,
    apply_latency: Mutex<Option<Duration>>,
}

impl MemoryTableStore {
    /// Create a store serving `table_name` with the given rows as text cells.
    pub fn new<R, C>(table_name: impl Into<String>, rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let grid = rows
            .into_iter()
            .map(|row| row.into_iter().map(|c| CellValue::Text(c.into())).collect())
            .collect();

        Self {
            table_name: table_name.into(),
            grid: Mutex::new(grid),
            initialized: AtomicBool::new(false),
            load_calls: AtomicU64::new(0),
            apply_calls: AtomicU64::new(0),
            fail_loads: AtomicU32::new(0),
            fail_applies: AtomicU32::new(0),
            applied: Mutex::new(Vec::new()),
            apply_latency: Mutex::new(None),
        }
    }

    /// Create an empty store serving `table_name`.
    pub fn empty(table_name: impl Into<String>) -> Self {
        Self::new(table_name, Vec::<Vec<String>>::new())
    }

    /// Fail the next `n` calls to `load_grid` with a transient error.
    pub fn fail_next_loads(&self, n: u32) {
        self.fail_loads.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` calls to `apply_cell_writes` with a transient error.
    pub fn fail_next_applies(&self, n: u32) {
        self.fail_applies.store(n, Ordering::SeqCst);
    }

    /// Delay every apply by `latency`.
    pub fn set_apply_latency(&self, latency: Duration) {
        *self.apply_latency.lock() = Some(latency);
    }

    /// Number of `load_grid` calls, failed ones included.
    pub fn load_calls(&self) -> u64 {
        self.load_calls.load(Ordering::SeqCst)
    }

    /// Number of `apply_cell_writes` calls, failed ones included.
    pub fn apply_calls(&self) -> u64 {
        self.apply_calls.load(Ordering::SeqCst)
    }

    /// Every successfully applied batch, in order.
    pub fn applied_batches(&self) -> Vec<Vec<CellWrite>> {
        self.applied.lock().clone()
    }

    /// Rendered value at a 1-based row and 0-based column.
    pub fn cell(&self, row: usize, column: usize) -> Option<String> {
        let grid = self.grid.lock();
        row.checked_sub(1)
            .and_then(|r| grid.get(r))
            .and_then(|cells| cells.get(column))
            .map(CellValue::render)
    }

    /// Raw typed value at a 1-based row and 0-based column.
    pub fn raw_cell(&self, row: usize, column: usize) -> Option<CellValue> {
        let grid = self.grid.lock();
        row.checked_sub(1)
            .and_then(|r| grid.get(r))
            .and_then(|cells| cells.get(column))
            .cloned()
    }

    /// Insert a row so it lands at the given 1-based position.
    pub fn insert_row<C>(&self, position: usize, cells: C)
    where
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let row = cells
            .into_iter()
            .map(|c| CellValue::Text(c.into()))
            .collect();
        let mut grid = self.grid.lock();
        let index = position.saturating_sub(1).min(grid.len());
        grid.insert(index, row);
    }

    /// Delete the row at the given 1-based position.
    pub fn delete_row(&self, position: usize) {
        let mut grid = self.grid.lock();
        if position >= 1 && position <= grid.len() {
            grid.remove(position - 1);
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn initialize(&self, target: &TableTarget) -> StoreResult<()> {
        if target.table_name != self.table_name {
            return Err(StoreError::TableNotFound(target.table_name.clone()));
        }
        self.initialized.store(true, Ordering::SeqCst);
        debug!(table = %self.table_name, "Memory store initialized");
        Ok(())
    }

    async fn load_grid(&self) -> StoreResult<Grid> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(StoreError::NotInitialized);
        }
        if Self::take_failure(&self.fail_loads) {
            return Err(StoreError::Transient("injected load failure".into()));
        }

        let grid = self.grid.lock();
        Ok(grid
            .iter()
            .map(|row| row.iter().map(CellValue::render).collect())
            .collect())
    }

    async fn apply_cell_writes(&self, writes: &[CellWrite]) -> StoreResult<()> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(StoreError::NotInitialized);
        }

        let latency = *self.apply_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if Self::take_failure(&self.fail_applies) {
            return Err(StoreError::Transient("injected apply failure".into()));
        }

        {
            let mut grid = self.grid.lock();
            for write in writes {
                let Some(r) = write.row.checked_sub(1) else {
                    return Err(StoreError::Malformed(format!(
                        "row positions are 1-based, got {}",
                        write.row
                    )));
                };
                if grid.len() <= r {
                    grid.resize_with(r + 1, Vec::new);
                }
                let cells = &mut grid[r];
                if cells.len() <= write.column {
                    cells.resize(write.column + 1, CellValue::Text(String::new()));
                }
                cells[write.column] = write.value.clone();
            }
        }

        self.applied.lock().push(writes.to_vec());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
