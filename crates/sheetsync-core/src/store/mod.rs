//! Remote table store abstraction.
//!
//! The store is the sole source of truth. The core only needs three calls
//! from it: locate the table, read every row as strings, and apply a set of
//! physically-addressed cell writes in one call.
//!
//! ## Backends
//!
//! - **File**: a JSON document on the local filesystem
//! - **Memory**: an in-process grid with call counting and failure injection

mod file;
mod memory;

pub use file::FileTableStore;
pub use memory::MemoryTableStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Result type for store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Raw table contents, row-major, header rows included.
pub type Grid = Vec<Vec<String>>;

/// Identifies the table a store should serve.
#[derive(Debug, Clone, PartialEq)]
pub struct TableTarget {
    /// Optional credentials file
    pub credentials: Option<PathBuf>,
    /// Document identifier
    pub table_id: String,
    /// Table (sheet) name inside the document
    pub table_name: String,
}

impl From<&StoreConfig> for TableTarget {
    fn from(config: &StoreConfig) -> Self {
        Self {
            credentials: config.credentials.clone(),
            table_id: config.table_id.clone(),
            table_name: config.table_name.clone(),
        }
    }
}

/// A typed cell value, as written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// Boolean cell
    Bool(bool),
    /// Numeric cell
    Number(f64),
    /// Text cell
    Text(String),
}

impl CellValue {
    /// Coerce a logical string into the store's native typing.
    ///
    /// Numbers win first, then case-insensitive `true`/`false`, then text.
    pub fn coerce(raw: &str) -> Self {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            if let Ok(n) = trimmed.parse::<f64>() {
                if n.is_finite() {
                    return CellValue::Number(n);
                }
            }
        }

        if raw.eq_ignore_ascii_case("true") {
            CellValue::Bool(true)
        } else if raw.eq_ignore_ascii_case("false") {
            CellValue::Bool(false)
        } else {
            CellValue::Text(raw.to_string())
        }
    }

    /// Render the value the way a read returns it.
    pub fn render(&self) -> String {
        match self {
            CellValue::Bool(true) => "TRUE".to_string(),
            CellValue::Bool(false) => "FALSE".to_string(),
            CellValue::Number(n) => render_number(*n),
            CellValue::Text(s) => s.clone(),
        }
    }
}

fn render_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// A physically-addressed cell write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellWrite {
    /// 1-based row position in the store
    pub row: usize,
    /// 0-based column position
    pub column: usize,
    /// Value to write
    pub value: CellValue,
}

/// Operations the core consumes from a remote table store.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Locate the target table. Fails with [`StoreError::TableNotFound`]
    /// when the named table does not exist.
    async fn initialize(&self, target: &TableTarget) -> StoreResult<()>;

    /// Read every row of the table as strings.
    async fn load_grid(&self) -> StoreResult<Grid>;

    /// Apply all writes in one call.
    async fn apply_cell_writes(&self, writes: &[CellWrite]) -> StoreResult<()>;

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}

/// Create the store configured by `config`.
///
/// The memory backend starts from `seed_rows`, which must hold at least the
/// header row.
pub fn create_store(config: &StoreConfig) -> crate::Result<Arc<dyn TableStore>> {
    match config.backend {
        StoreBackend::File => Ok(Arc::new(FileTableStore::new(config.data_dir.clone()))),
        StoreBackend::Memory => {
            if config.seed_rows.is_empty() {
                return Err(crate::Error::InvalidConfig(
                    "memory backend requires seed_rows with at least a header row".into(),
                ));
            }
            Ok(Arc::new(MemoryTableStore::new(
                config.table_name.clone(),
                config.seed_rows.clone(),
            )))
        }
    }
}
