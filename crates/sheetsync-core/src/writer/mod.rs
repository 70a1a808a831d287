//! Deferred and immediate cell writes.
//!
//! Writes are queued as logical intents addressed by key and column name.
//! Physical positions are resolved only at flush time, against a freshly
//! read snapshot, so rows inserted or deleted in the meantime do not
//! misdirect a write.

mod batch;
mod plan;

pub use batch::{BatchFailure, BatchWriter};
pub use plan::{resolve_batch, BatchPlan};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One queued cell mutation, addressed logically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub key: String,
    pub column: String,
    pub value: String,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingWrite {
    pub fn new(
        key: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            column: column.into(),
            value: value.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// Result of one flush.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlushOutcome {
    /// Cells sent to the store
    pub applied: usize,
    /// Writes superseded within the batch
    pub coalesced: usize,
    /// Writes that no longer resolved and were discarded
    pub dropped: Vec<PendingWrite>,
}

impl FlushOutcome {
    pub(crate) fn from_plan(plan: BatchPlan) -> Self {
        Self {
            applied: plan.cells.len(),
            coalesced: plan.coalesced,
            dropped: plan.dropped,
        }
    }
}
