//! Sheetsync Core - coordinated access to a shared remote table
//!
//! Lets several independent agents read and mutate rows of a spreadsheet-like
//! table without clobbering each other and without exceeding the store's
//! call-rate limits:
//!
//! - Read-through snapshot cache with a minimum re-read interval
//! - Logically addressed write queue flushed on a timer or on demand
//! - Bounded retry with exponential backoff around every store call
//! - Graceful drain that flushes the queue once on shutdown

pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod key;
pub mod metrics;
pub mod retry;
pub mod snapshot;
pub mod store;
pub mod writer;

// Re-export commonly used types
pub use config::Config;
pub use engine::{DrainReport, LifecycleState, Lookup, TableSync};
pub use error::{Error, Result};
pub use error::{SnapshotError, StoreError};
