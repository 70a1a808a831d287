//! Prometheus metrics export.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket boundaries in milliseconds for flush duration.
/// Converts to seconds: [0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
const FLUSH_DURATION_BUCKETS_MS: [u64; 8] = [50, 100, 250, 500, 1000, 2500, 5000, 10000];

/// How a flush was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushKind {
    /// Timer-driven batch
    Scheduled,
    /// Caller-requested immediate write
    Immediate,
    /// Final flush while draining
    Drain,
}

impl FlushKind {
    /// Get the label value for Prometheus export.
    pub fn as_label(&self) -> &'static str {
        match self {
            FlushKind::Scheduled => "scheduled",
            FlushKind::Immediate => "immediate",
            FlushKind::Drain => "drain",
        }
    }
}

/// Synchronization metrics with counters, gauges, and a flush histogram.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    // === COUNTERS ===
    /// Fresh reads from the store
    reads_total: AtomicU64,

    /// Reads answered from cache after waiting out the read interval
    throttled_reads_total: AtomicU64,

    /// Flushes by trigger
    flushes_scheduled: AtomicU64,
    flushes_immediate: AtomicU64,
    flushes_drain: AtomicU64,

    /// Flushes that ended with undelivered writes
    flush_failures_total: AtomicU64,

    /// Cells sent to the store
    cells_written_total: AtomicU64,

    /// Writes superseded by a later write to the same cell in one batch
    writes_coalesced_total: AtomicU64,

    /// Writes whose key or column no longer resolved
    writes_dropped_total: AtomicU64,

    /// Writes reported undelivered after retry exhaustion
    writes_undelivered_total: AtomicU64,

    /// Store call retries and exhaustions
    retries_total: AtomicU64,
    retries_exhausted_total: AtomicU64,

    // === GAUGES ===
    /// Writes waiting in the update queue
    pending_writes: AtomicU64,

    // === HISTOGRAM: flush_duration_seconds ===
    flush_duration_sum_ms: AtomicU64,
    flush_duration_count: AtomicU64,
    /// Buckets: [0.05s .. 10.0s, +Inf]
    flush_duration_buckets: [AtomicU64; 9],
}

impl SyncMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self::default()
    }

    // === COUNTER RECORDING ===

    /// Record a completed flush.
    pub fn record_flush(
        &self,
        kind: FlushKind,
        cells: usize,
        coalesced: usize,
        dropped: usize,
        duration: Duration,
    ) {
        match kind {
            FlushKind::Scheduled => self.flushes_scheduled.fetch_add(1, Ordering::Relaxed),
            FlushKind::Immediate => self.flushes_immediate.fetch_add(1, Ordering::Relaxed),
            FlushKind::Drain => self.flushes_drain.fetch_add(1, Ordering::Relaxed),
        };
        self.cells_written_total
            .fetch_add(cells as u64, Ordering::Relaxed);
        self.writes_coalesced_total
            .fetch_add(coalesced as u64, Ordering::Relaxed);
        self.writes_dropped_total
            .fetch_add(dropped as u64, Ordering::Relaxed);

        let duration_ms = duration.as_millis() as u64;
        self.flush_duration_sum_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        self.flush_duration_count.fetch_add(1, Ordering::Relaxed);

        // Buckets are cumulative (le = less than or equal)
        for (i, &bucket_ms) in FLUSH_DURATION_BUCKETS_MS.iter().enumerate() {
            if duration_ms <= bucket_ms {
                self.flush_duration_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.flush_duration_buckets[8].fetch_add(1, Ordering::Relaxed);
    }

    /// Record a flush that left writes undelivered.
    pub fn record_flush_failure(&self, undelivered: usize) {
        self.flush_failures_total.fetch_add(1, Ordering::Relaxed);
        self.writes_undelivered_total
            .fetch_add(undelivered as u64, Ordering::Relaxed);
    }

    // === SYNCED TOTALS ===

    /// Copy read totals from the snapshot cache.
    pub fn sync_reads(&self, reads: u64, throttled: u64) {
        self.reads_total.store(reads, Ordering::Relaxed);
        self.throttled_reads_total.store(throttled, Ordering::Relaxed);
    }

    /// Copy retry totals from the retry executor.
    pub fn sync_retries(&self, retries: u64, exhausted: u64) {
        self.retries_total.store(retries, Ordering::Relaxed);
        self.retries_exhausted_total
            .store(exhausted, Ordering::Relaxed);
    }

    // === GAUGE UPDATES ===

    /// Update the pending-writes gauge.
    pub fn set_pending_writes(&self, count: usize) {
        self.pending_writes.store(count as u64, Ordering::Relaxed);
    }

    // === GETTERS ===

    pub fn reads_total(&self) -> u64 {
        self.reads_total.load(Ordering::Relaxed)
    }

    pub fn throttled_reads_total(&self) -> u64 {
        self.throttled_reads_total.load(Ordering::Relaxed)
    }

    /// Flushes of the given kind.
    pub fn flushes(&self, kind: FlushKind) -> u64 {
        match kind {
            FlushKind::Scheduled => self.flushes_scheduled.load(Ordering::Relaxed),
            FlushKind::Immediate => self.flushes_immediate.load(Ordering::Relaxed),
            FlushKind::Drain => self.flushes_drain.load(Ordering::Relaxed),
        }
    }

    pub fn flush_failures_total(&self) -> u64 {
        self.flush_failures_total.load(Ordering::Relaxed)
    }

    pub fn cells_written_total(&self) -> u64 {
        self.cells_written_total.load(Ordering::Relaxed)
    }

    pub fn writes_coalesced_total(&self) -> u64 {
        self.writes_coalesced_total.load(Ordering::Relaxed)
    }

    pub fn writes_dropped_total(&self) -> u64 {
        self.writes_dropped_total.load(Ordering::Relaxed)
    }

    pub fn writes_undelivered_total(&self) -> u64 {
        self.writes_undelivered_total.load(Ordering::Relaxed)
    }

    pub fn retries_total(&self) -> u64 {
        self.retries_total.load(Ordering::Relaxed)
    }

    pub fn retries_exhausted_total(&self) -> u64 {
        self.retries_exhausted_total.load(Ordering::Relaxed)
    }

    pub fn pending_writes(&self) -> u64 {
        self.pending_writes.load(Ordering::Relaxed)
    }

    /// Flush duration histogram data for Prometheus export.
    pub fn flush_duration_histogram(&self) -> FlushDurationHistogram {
        let mut buckets = [(0.0, 0); 8];
        for (i, &bucket_ms) in FLUSH_DURATION_BUCKETS_MS.iter().enumerate() {
            buckets[i] = (
                bucket_ms as f64 / 1000.0,
                self.flush_duration_buckets[i].load(Ordering::Relaxed),
            );
        }

        FlushDurationHistogram {
            sum_seconds: self.flush_duration_sum_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            count: self.flush_duration_count.load(Ordering::Relaxed),
            buckets,
            inf_bucket: self.flush_duration_buckets[8].load(Ordering::Relaxed),
        }
    }

    /// Export all metrics in Prometheus text format.
    ///
    /// # Example
    /// ```
    /// use sheetsync_core::metrics::{FlushKind, SyncMetrics};
    /// use std::time::Duration;
    ///
    /// let metrics = SyncMetrics::new();
    /// metrics.record_flush(FlushKind::Scheduled, 2, 0, 0, Duration::from_millis(40));
    /// let text = metrics.export_prometheus_text();
    /// assert!(text.contains("sheetsync_cells_written_total 2"));
    /// ```
    pub fn export_prometheus_text(&self) -> String {
        self.export_prometheus_text_with_prefix("sheetsync")
    }

    /// Export metrics in Prometheus text format with a custom name prefix.
    pub fn export_prometheus_text_with_prefix(&self, prefix: &str) -> String {
        let mut out = String::with_capacity(4096);

        let mut metric = |name: &str, kind: &str, help: &str, samples: &[(&str, u64)]| {
            out.push_str(&format!("# HELP {prefix}_{name} {help}\n"));
            out.push_str(&format!("# TYPE {prefix}_{name} {kind}\n"));
            for (labels, value) in samples {
                out.push_str(&format!("{prefix}_{name}{labels} {value}\n"));
            }
            out.push('\n');
        };

        // === COUNTERS ===
        metric(
            "reads_total",
            "counter",
            "Fresh table reads from the store",
            &[("", self.reads_total())],
        );
        metric(
            "throttled_reads_total",
            "counter",
            "Reads served from cache after waiting out the read interval",
            &[("", self.throttled_reads_total())],
        );
        metric(
            "flushes_total",
            "counter",
            "Flushes by trigger",
            &[
                (
                    "{kind=\"scheduled\"}",
                    self.flushes(FlushKind::Scheduled),
                ),
                (
                    "{kind=\"immediate\"}",
                    self.flushes(FlushKind::Immediate),
                ),
                ("{kind=\"drain\"}", self.flushes(FlushKind::Drain)),
            ],
        );
        metric(
            "flush_failures_total",
            "counter",
            "Flushes that left writes undelivered",
            &[("", self.flush_failures_total())],
        );
        metric(
            "cells_written_total",
            "counter",
            "Cells sent to the store",
            &[("", self.cells_written_total())],
        );
        metric(
            "writes_coalesced_total",
            "counter",
            "Writes superseded within a batch",
            &[("", self.writes_coalesced_total())],
        );
        metric(
            "writes_dropped_total",
            "counter",
            "Writes whose key or column no longer resolved",
            &[("", self.writes_dropped_total())],
        );
        metric(
            "writes_undelivered_total",
            "counter",
            "Writes reported undelivered after retry exhaustion",
            &[("", self.writes_undelivered_total())],
        );
        metric(
            "retries_total",
            "counter",
            "Store call retries",
            &[("", self.retries_total())],
        );
        metric(
            "retries_exhausted_total",
            "counter",
            "Store calls that ran out of attempts",
            &[("", self.retries_exhausted_total())],
        );

        // === GAUGES ===
        metric(
            "pending_writes",
            "gauge",
            "Writes waiting in the update queue",
            &[("", self.pending_writes())],
        );

        // === HISTOGRAM: flush_duration_seconds ===
        let hist = self.flush_duration_histogram();
        out.push_str(&format!(
            "# HELP {prefix}_flush_duration_seconds Duration of flush operations\n"
        ));
        out.push_str(&format!(
            "# TYPE {prefix}_flush_duration_seconds histogram\n"
        ));
        for (le, count) in &hist.buckets {
            out.push_str(&format!(
                "{prefix}_flush_duration_seconds_bucket{{le=\"{le}\"}} {count}\n"
            ));
        }
        out.push_str(&format!(
            "{prefix}_flush_duration_seconds_bucket{{le=\"+Inf\"}} {}\n",
            hist.inf_bucket
        ));
        out.push_str(&format!(
            "{prefix}_flush_duration_seconds_sum {}\n",
            hist.sum_seconds
        ));
        out.push_str(&format!(
            "{prefix}_flush_duration_seconds_count {}\n",
            hist.count
        ));

        out
    }
}

/// Flush duration histogram data.
#[derive(Debug, Clone)]
pub struct FlushDurationHistogram {
    /// Sum of all durations in seconds
    pub sum_seconds: f64,
    /// Total number of observations
    pub count: u64,
    /// Cumulative bucket counts: (upper_bound_seconds, count)
    pub buckets: [(f64, u64); 8],
    /// Count for +Inf bucket (equals total count)
    pub inf_bucket: u64,
}
