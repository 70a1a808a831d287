//! Immutable table snapshot with lookup indices.

use super::query::Condition;
use crate::key::resolve_key_column;
use crate::store::Grid;
use crate::SnapshotError;
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{HashMap, HashSet};
use tokio::time::Instant;

/// Point-in-time read of the table plus derived indices.
///
/// Never mutated after construction; a new read produces a new snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    headers: Vec<String>,
    /// Data rows, each padded to `headers.len()`
    rows: Vec<Vec<String>>,
    /// 1-based store position of each data row
    positions: Vec<usize>,
    key_column: Option<usize>,
    /// Key value -> index into `rows`, last occurrence wins
    key_index: HashMap<String, usize>,
    column_index: HashMap<String, usize>,
    fetched_at: DateTime<Utc>,
    fetched: Instant,
}

impl Snapshot {
    /// Build a snapshot from raw grid rows.
    ///
    /// With `header_row == 1` the first row is the header (trailing blanks
    /// trimmed) and every row up to the last non-blank one is data. For any
    /// other header row, the header ends at the first blank cell and the
    /// data ends at the first wholly blank row.
    ///
    /// The key column is resolved from `key_spec` against the headers.
    pub fn from_grid(
        grid: Grid,
        header_row: u32,
        key_spec: Option<&str>,
    ) -> Result<Self, SnapshotError> {
        Self::build(grid, header_row, |headers| {
            resolve_key_column(key_spec, headers)
                .and_then(|name| headers.iter().position(|h| h == name))
        })
    }

    /// Build a snapshot keyed by an already resolved header name.
    ///
    /// If `key_column` is no longer among the headers the snapshot has no
    /// key column and no row is addressable by key.
    pub fn from_grid_with_key(
        grid: Grid,
        header_row: u32,
        key_column: &str,
    ) -> Result<Self, SnapshotError> {
        Self::build(grid, header_row, |headers| {
            headers
                .iter()
                .position(|h| !h.is_empty() && h == key_column)
        })
    }

    fn build<F>(grid: Grid, header_row: u32, pick_key: F) -> Result<Self, SnapshotError>
    where
        F: FnOnce(&[String]) -> Option<usize>,
    {
        let header_index = (header_row as usize)
            .checked_sub(1)
            .filter(|&i| i < grid.len())
            .ok_or(SnapshotError::HeaderRowOutOfRange {
                row: header_row,
                available: grid.len(),
            })?;

        let native = header_row == 1;
        let header_cells = &grid[header_index];
        let headers: Vec<String> = if native {
            let end = header_cells
                .iter()
                .rposition(|c| !is_blank(c))
                .map_or(0, |i| i + 1);
            header_cells[..end].iter().map(|c| c.trim().to_string()).collect()
        } else {
            header_cells
                .iter()
                .take_while(|c| !is_blank(c))
                .map(|c| c.trim().to_string())
                .collect()
        };

        if headers.is_empty() {
            return Err(SnapshotError::EmptyHeader(header_row));
        }

        let mut seen = HashSet::new();
        for header in headers.iter().filter(|h| !h.is_empty()) {
            if !seen.insert(header.as_str()) {
                return Err(SnapshotError::DuplicateHeader(header.clone()));
            }
        }

        let width = headers.len();
        let data = &grid[header_index + 1..];
        let data_len = if native {
            data.iter()
                .rposition(|row| !is_blank_row(row, width))
                .map_or(0, |i| i + 1)
        } else {
            data.iter()
                .position(|row| is_blank_row(row, width))
                .unwrap_or(data.len())
        };

        let mut rows = Vec::with_capacity(data_len);
        let mut positions = Vec::with_capacity(data_len);
        for (offset, raw) in data[..data_len].iter().enumerate() {
            let mut row: Vec<String> = raw.iter().take(width).cloned().collect();
            row.resize(width, String::new());
            rows.push(row);
            positions.push(header_index + 2 + offset);
        }

        let column_index: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.is_empty())
            .map(|(i, h)| (h.clone(), i))
            .collect();

        let key_column = pick_key(&headers);

        let mut key_index = HashMap::new();
        if let Some(col) = key_column {
            for (i, row) in rows.iter().enumerate() {
                let key = &row[col];
                if !key.is_empty() {
                    key_index.insert(key.clone(), i);
                }
            }
        }

        Ok(Self {
            headers,
            rows,
            positions,
            key_column,
            key_index,
            column_index,
            fetched_at: Utc::now(),
            fetched: Instant::now(),
        })
    }

    /// Column names in column order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Header of the resolved key column.
    pub fn key_column(&self) -> Option<&str> {
        self.key_column.map(|i| self.headers[i].as_str())
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no data rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// When the snapshot was read.
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Monotonic read time, used by the read throttle.
    pub fn fetched_instant(&self) -> Instant {
        self.fetched
    }

    /// 1-based store position of the row holding `key`.
    pub fn row_position(&self, key: &str) -> Option<usize> {
        self.key_index.get(key).map(|&i| self.positions[i])
    }

    /// 0-based position of `column`.
    pub fn column_position(&self, column: &str) -> Option<usize> {
        self.column_index.get(column).copied()
    }

    /// Current value of `(key, column)`.
    pub fn value(&self, key: &str, column: &str) -> Option<&str> {
        let row = *self.key_index.get(key)?;
        let col = self.column_position(column)?;
        Some(self.rows[row][col].as_str())
    }

    /// Full row for `key`.
    pub fn record(&self, key: &str) -> Option<Record> {
        self.key_index.get(key).map(|&i| self.record_at(i))
    }

    /// Non-empty key values in row order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        let col = self.key_column;
        self.rows
            .iter()
            .filter_map(move |row| col.map(|c| row[c].as_str()))
            .filter(|k| !k.is_empty())
    }

    /// Keys of rows matching every condition, in row order.
    ///
    /// A condition on an unknown column matches everything.
    pub fn query(&self, conditions: &[Condition], limit: Option<usize>) -> Vec<String> {
        let Some(key_col) = self.key_column else {
            return Vec::new();
        };

        let resolved: Vec<(Option<usize>, &Condition)> = conditions
            .iter()
            .map(|c| (self.column_position(&c.column), c))
            .collect();

        self.rows
            .iter()
            .filter(|row| !row[key_col].is_empty())
            .filter(|row| {
                resolved.iter().all(|(col, cond)| match col {
                    Some(i) => cond.matches(&row[*i]),
                    None => true,
                })
            })
            .take(limit.unwrap_or(usize::MAX))
            .map(|row| row[key_col].clone())
            .collect()
    }

    fn record_at(&self, index: usize) -> Record {
        Record {
            fields: self
                .headers
                .iter()
                .zip(&self.rows[index])
                .filter(|(h, _)| !h.is_empty())
                .map(|(h, v)| (h.clone(), v.clone()))
                .collect(),
        }
    }
}

fn is_blank(cell: &str) -> bool {
    cell.trim().is_empty()
}

fn is_blank_row(row: &[String], width: usize) -> bool {
    row.iter().take(width).all(|c| is_blank(c))
}

/// One row as column-name/value pairs in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    /// Value of `column`.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(h, _)| h == column)
            .map(|(_, v)| v.as_str())
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (h, v) in &self.fields {
            map.serialize_entry(h, v)?;
        }
        map.end()
    }
}
