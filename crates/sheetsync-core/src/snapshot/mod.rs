//! Table snapshots and the read-through snapshot cache.
//!
//! ## Header modes
//!
//! - **Native** (`header_row = 1`): the first row is the header and data
//!   runs to the last non-blank row.
//! - **Scan** (`header_row > 1`): the header ends at the first blank cell of
//!   the configured row and data ends at the first wholly blank row.

mod cache;
mod query;
mod table;

pub use cache::{CacheStats, SnapshotCache};
pub use query::{CompareOp, Condition};
pub use table::{Record, Snapshot};
