//! JSON-document table store on the local filesystem.
//!
//! Layout: `<data_dir>/<table_id>.json` holding
//! `{ "tables": { "<table_name>": [[cell, ...], ...] } }`. Cells may be
//! strings, numbers, booleans or null.

use super::{CellValue, CellWrite, Grid, StoreResult, TableStore, TableTarget};
use crate::StoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct TableDocument {
    #[serde(default)]
    tables: BTreeMap<String, Vec<Vec<Value>>>,
}

#[derive(Debug, Clone)]
struct ResolvedTarget {
    path: PathBuf,
    table_name: String,
}

/// Table store persisting to a JSON document.
pub struct FileTableStore {
    data_dir: PathBuf,
    target: RwLock<Option<ResolvedTarget>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileTableStore {
    /// Create a store rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            target: RwLock::new(None),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Path of the document for `table_id`.
    pub fn document_path(&self, table_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", table_id))
    }

    fn resolved(&self) -> StoreResult<ResolvedTarget> {
        self.target.read().clone().ok_or(StoreError::NotInitialized)
    }

    async fn read_document(path: &Path) -> StoreResult<TableDocument> {
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|e| StoreError::Malformed(e.to_string()))
    }

    async fn write_document(path: &Path, document: &TableDocument) -> StoreResult<()> {
        let content = serde_json::to_string_pretty(document)
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

fn render_json(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => CellValue::Bool(*b).render(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.as_f64().map(|f| CellValue::Number(f).render()).unwrap_or_default(),
        },
        other => other.to_string(),
    }
}

fn to_json(value: &CellValue) -> Value {
    match value {
        CellValue::Bool(b) => Value::Bool(*b),
        CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Value::from(*n as i64),
        CellValue::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        CellValue::Text(s) => Value::String(s.clone()),
    }
}

#[async_trait]
impl TableStore for FileTableStore {
    async fn initialize(&self, target: &TableTarget) -> StoreResult<()> {
        if let Some(credentials) = &target.credentials {
            debug!(path = %credentials.display(), "File store ignores credentials");
        }

        let path = self.document_path(&target.table_id);
        let document = match Self::read_document(&path).await {
            Ok(doc) => doc,
            Err(StoreError::Io(_)) => {
                return Err(StoreError::TableNotFound(format!(
                    "{} (no document at {})",
                    target.table_name,
                    path.display()
                )))
            }
            Err(e) => return Err(e),
        };

        if !document.tables.contains_key(&target.table_name) {
            return Err(StoreError::TableNotFound(target.table_name.clone()));
        }

        info!(
            path = %path.display(),
            table = %target.table_name,
            "File store initialized"
        );

        *self.target.write() = Some(ResolvedTarget {
            path,
            table_name: target.table_name.clone(),
        });
        Ok(())
    }

    async fn load_grid(&self) -> StoreResult<Grid> {
        let target = self.resolved()?;
        let document = Self::read_document(&target.path).await?;
        let rows = document
            .tables
            .get(&target.table_name)
            .ok_or_else(|| StoreError::TableNotFound(target.table_name.clone()))?;

        Ok(rows
            .iter()
            .map(|row| row.iter().map(render_json).collect())
            .collect())
    }

    async fn apply_cell_writes(&self, writes: &[CellWrite]) -> StoreResult<()> {
        let target = self.resolved()?;
        let _guard = self.write_lock.lock().await;

        let mut document = Self::read_document(&target.path).await?;
        let rows = document
            .tables
            .get_mut(&target.table_name)
            .ok_or_else(|| StoreError::TableNotFound(target.table_name.clone()))?;

        for write in writes {
            let r = write.row.checked_sub(1).ok_or_else(|| {
                StoreError::Malformed(format!("row positions are 1-based, got {}", write.row))
            })?;
            if rows.len() <= r {
                rows.resize_with(r + 1, Vec::new);
            }
            let cells = &mut rows[r];
            if cells.len() <= write.column {
                cells.resize(write.column + 1, Value::Null);
            }
            cells[write.column] = to_json(&write.value);
        }

        Self::write_document(&target.path, &document).await?;
        debug!(cells = writes.len(), path = %target.path.display(), "Cell writes persisted");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn target(name: &str) -> TableTarget {
        TableTarget {
            credentials: None,
            table_id: "tasks".into(),
            table_name: name.into(),
        }
    }

    fn seed(dir: &TempDir) {
        let content = r#"{
            "tables": {
                "Sheet1": [
                    ["id", "count", "done", "note"],
                    ["item001", 3, true, null],
                    ["item002", 1.5, false, "x"]
                ]
            }
        }"#;
        std::fs::write(dir.path().join("tasks.json"), content).unwrap();
    }

    #[tokio::test]
    async fn test_initialize_missing_document() {
        let dir = TempDir::new().unwrap();
        let store = FileTableStore::new(dir.path());
        let err = store.initialize(&target("Sheet1")).await.unwrap_err();
        assert!(matches!(err, StoreError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn test_initialize_missing_table() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let store = FileTableStore::new(dir.path());
        let err = store.initialize(&target("Sheet2")).await.unwrap_err();
        assert_eq!(err, StoreError::TableNotFound("Sheet2".into()));
    }

    #[tokio::test]
    async fn test_load_renders_cells() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let store = FileTableStore::new(dir.path());
        store.initialize(&target("Sheet1")).await.unwrap();

        let grid = store.load_grid().await.unwrap();
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[1], vec!["item001", "3", "TRUE", ""]);
        assert_eq!(grid[2], vec!["item002", "1.5", "FALSE", "x"]);
    }

    #[tokio::test]
    async fn test_apply_persists_native_types() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let store = FileTableStore::new(dir.path());
        store.initialize(&target("Sheet1")).await.unwrap();

        store
            .apply_cell_writes(&[
                CellWrite {
                    row: 2,
                    column: 1,
                    value: CellValue::Number(4.0),
                },
                CellWrite {
                    row: 4,
                    column: 0,
                    value: CellValue::Text("item003".into()),
                },
            ])
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("tasks.json")).unwrap();
        let doc: TableDocument = serde_json::from_str(&raw).unwrap();
        let rows = &doc.tables["Sheet1"];
        assert_eq!(rows[1][1], Value::from(4));
        assert_eq!(rows[3][0], Value::String("item003".into()));

        let grid = store.load_grid().await.unwrap();
        assert_eq!(grid[1][1], "4");
        assert_eq!(grid[3], vec!["item003"]);
    }

    #[tokio::test]
    async fn test_load_before_initialize() {
        let dir = TempDir::new().unwrap();
        let store = FileTableStore::new(dir.path());
        assert_eq!(
            store.load_grid().await.unwrap_err(),
            StoreError::NotInitialized
        );
    }
}
