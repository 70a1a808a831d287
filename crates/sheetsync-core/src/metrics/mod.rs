//! Sync metrics and their Prometheus text rendering.

mod prometheus;

pub use prometheus::{FlushDurationHistogram, FlushKind, SyncMetrics};
