//! Table synchronization engine.

mod table_sync;

pub use table_sync::{
    compose_append, DrainReport, LifecycleState, Lookup, TableSync, DEFAULT_APPEND_SEPARATOR,
};
