//! Update queue and batch scheduler.
//!
//! [`BatchWriter`] owns the three pieces of shared write-side state: the
//! queue, the scheduled-flush handle and the shutdown flag. Every mutation
//! goes through its methods.

use super::{resolve_batch, FlushOutcome, PendingWrite};
use crate::health::{component, HealthCheck};
use crate::metrics::{FlushKind, SyncMetrics};
use crate::retry::RetryExecutor;
use crate::snapshot::SnapshotCache;
use crate::store::TableStore;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Report of a flush whose writes could not be delivered.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    /// Which flush failed: `scheduled`, `immediate` or `drain`.
    pub kind: &'static str,
    /// Writes that were not applied.
    pub writes: Vec<PendingWrite>,
    /// Last store error.
    pub reason: String,
    /// Attempts made, when the retry budget ran out.
    pub attempts: Option<u32>,
}

#[derive(Default)]
struct WriterState {
    queue: Vec<PendingWrite>,
    scheduled: Option<JoinHandle<()>>,
}

/// Queues logical writes and applies them in timed batches.
pub struct BatchWriter {
    store: Arc<dyn TableStore>,
    cache: Arc<SnapshotCache>,
    retry: Arc<RetryExecutor>,
    batch_interval: Duration,
    state: Mutex<WriterState>,
    shutting_down: AtomicBool,
    cancel_tx: broadcast::Sender<()>,
    failure_tx: broadcast::Sender<BatchFailure>,
    metrics: Arc<SyncMetrics>,
    health: Arc<HealthCheck>,
}

impl BatchWriter {
    /// Create an idle writer. No timer runs until the first enqueue.
    pub fn new(
        store: Arc<dyn TableStore>,
        cache: Arc<SnapshotCache>,
        retry: Arc<RetryExecutor>,
        batch_interval: Duration,
        metrics: Arc<SyncMetrics>,
        health: Arc<HealthCheck>,
    ) -> Self {
        let (cancel_tx, _) = broadcast::channel(1);
        let (failure_tx, _) = broadcast::channel(16);

        Self {
            store,
            cache,
            retry,
            batch_interval,
            state: Mutex::new(WriterState::default()),
            shutting_down: AtomicBool::new(false),
            cancel_tx,
            failure_tx,
            metrics,
            health,
        }
    }

    /// Append a write to the queue, arming the batch timer if none is armed.
    ///
    /// While draining the write is still queued, but no timer is armed; the
    /// final drain flush picks it up.
    pub fn enqueue(self: &Arc<Self>, write: PendingWrite) {
        let mut state = self.state.lock();
        debug!(key = %write.key, column = %write.column, "Write enqueued");
        state.queue.push(write);
        self.metrics.set_pending_writes(state.queue.len());

        if state.scheduled.is_none() && !self.is_draining() {
            state.scheduled = Some(self.arm());
        }
    }

    fn arm(self: &Arc<Self>) -> JoinHandle<()> {
        let writer = Arc::clone(self);
        let mut cancel_rx = self.cancel_tx.subscribe();
        let interval = self.batch_interval;
        debug!(interval_ms = interval.as_millis() as u64, "Batch timer armed");

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel_rx.recv() => {
                    debug!("Batch timer cancelled");
                    return;
                }
            }
            writer.run_scheduled().await;
        })
    }

    async fn run_scheduled(self: &Arc<Self>) {
        // Failures are reported inside; the handle is cleared either way
        let _ = self.flush_queue(FlushKind::Scheduled).await;

        let mut state = self.state.lock();
        state.scheduled = None;
        if !state.queue.is_empty() && !self.is_draining() {
            state.scheduled = Some(self.arm());
        }
    }

    /// Apply `writes` immediately, bypassing the queue and the timer.
    ///
    /// Forces a fresh read to resolve positions.
    pub async fn flush_now(&self, writes: Vec<PendingWrite>) -> Result<FlushOutcome> {
        self.apply(writes, FlushKind::Immediate).await
    }

    /// Swap out the whole queue and apply it as one batch.
    pub async fn execute_batch(&self) -> Result<FlushOutcome> {
        self.flush_queue(FlushKind::Scheduled).await
    }

    async fn flush_queue(&self, kind: FlushKind) -> Result<FlushOutcome> {
        let batch = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.queue)
        };
        self.metrics.set_pending_writes(self.pending_len());

        if batch.is_empty() {
            return Ok(FlushOutcome::default());
        }
        self.apply(batch, kind).await
    }

    async fn apply(&self, writes: Vec<PendingWrite>, kind: FlushKind) -> Result<FlushOutcome> {
        let started = Instant::now();

        let snapshot = match self.cache.load(true).await {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(self.undelivered(writes, e, kind)),
        };

        let plan = resolve_batch(&writes, &snapshot);
        for write in &plan.dropped {
            warn!(
                key = %write.key,
                column = %write.column,
                kind = kind.as_label(),
                "Dropping write: key or column no longer present"
            );
        }

        if !plan.cells.is_empty() {
            let store = &self.store;
            let cells = &plan.cells;
            if let Err(e) = self
                .retry
                .run("apply_cell_writes", || store.apply_cell_writes(cells))
                .await
            {
                return Err(self.undelivered(writes, e, kind));
            }
        }

        let duration = started.elapsed();
        self.metrics.record_flush(
            kind,
            plan.cells.len(),
            plan.coalesced,
            plan.dropped.len(),
            duration,
        );
        self.health.mark_healthy(component::WRITER);

        let outcome = FlushOutcome::from_plan(plan);
        info!(
            kind = kind.as_label(),
            writes = writes.len(),
            cells = outcome.applied,
            coalesced = outcome.coalesced,
            dropped = outcome.dropped.len(),
            duration_ms = duration.as_millis() as u64,
            "Flush applied"
        );
        Ok(outcome)
    }

    fn undelivered(&self, writes: Vec<PendingWrite>, source: Error, kind: FlushKind) -> Error {
        let failure = BatchFailure {
            kind: kind.as_label(),
            writes,
            reason: source.to_string(),
            attempts: source.attempts(),
        };

        error!(
            kind = failure.kind,
            count = failure.writes.len(),
            attempts = failure.attempts.unwrap_or_default(),
            error = %source,
            writes = %serde_json::to_string(&failure.writes).unwrap_or_default(),
            "Writes undelivered"
        );
        self.metrics.record_flush_failure(failure.writes.len());
        self.health
            .mark_degraded(component::WRITER, &failure.reason);

        // No subscribers is fine
        let _ = self.failure_tx.send(failure.clone());

        Error::UndeliveredWrites {
            writes: failure.writes,
            source: Box::new(source),
        }
    }

    /// Stop scheduling and flush whatever remains, exactly once.
    ///
    /// Cancels an armed timer, waits for an in-flight batch to finish, then
    /// applies the remaining queue. A failure of that final flush is
    /// returned but not retried further.
    pub async fn drain(&self) -> Result<FlushOutcome> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Writer already draining");
        }
        let _ = self.cancel_tx.send(());

        let handle = self.state.lock().scheduled.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Batch task ended abnormally");
            }
        }

        let pending = self.pending_len();
        info!(pending, "Final flush");
        self.flush_queue(FlushKind::Drain).await
    }

    /// Number of queued writes.
    pub fn pending_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Copy of the queued writes.
    pub fn pending(&self) -> Vec<PendingWrite> {
        self.state.lock().queue.clone()
    }

    /// Whether a batch timer or batch is outstanding.
    pub fn is_scheduled(&self) -> bool {
        self.state.lock().scheduled.is_some()
    }

    /// Whether [`BatchWriter::drain`] has started.
    pub fn is_draining(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Receive a [`BatchFailure`] for every flush that leaves writes undelivered.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<BatchFailure> {
        self.failure_tx.subscribe()
    }
}
