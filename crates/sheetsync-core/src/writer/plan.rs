//! Resolution of logical write intents against a snapshot.

use super::PendingWrite;
use crate::snapshot::Snapshot;
use crate::store::{CellValue, CellWrite};
use std::collections::BTreeMap;

/// Physical writes derived from one batch of intents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchPlan {
    /// One write per distinct cell, holding the last value enqueued for it
    pub cells: Vec<CellWrite>,
    /// Intents whose key or column is absent from the snapshot
    pub dropped: Vec<PendingWrite>,
    /// Intents superseded by a later intent for the same cell
    pub coalesced: usize,
}

/// Resolve `writes` against `snapshot`.
///
/// Writes are folded in queue order into a `(row, column) -> value` map, so
/// the last write to a cell wins. Values are coerced here; the logical
/// strings in `writes` are left untouched.
pub fn resolve_batch(writes: &[PendingWrite], snapshot: &Snapshot) -> BatchPlan {
    let mut cells: BTreeMap<(usize, usize), CellValue> = BTreeMap::new();
    let mut dropped = Vec::new();
    let mut coalesced = 0;

    for write in writes {
        let row = snapshot.row_position(&write.key);
        let column = snapshot.column_position(&write.column);

        match (row, column) {
            (Some(row), Some(column)) => {
                if cells
                    .insert((row, column), CellValue::coerce(&write.value))
                    .is_some()
                {
                    coalesced += 1;
                }
            }
            _ => dropped.push(write.clone()),
        }
    }

    BatchPlan {
        cells: cells
            .into_iter()
            .map(|((row, column), value)| CellWrite { row, column, value })
            .collect(),
        dropped,
        coalesced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Snapshot {
        let grid = vec![
            vec!["id".to_string(), "status".to_string(), "count".to_string()],
            vec!["a".to_string(), "open".to_string(), "1".to_string()],
            vec!["b".to_string(), "open".to_string(), "2".to_string()],
        ];
        Snapshot::from_grid(grid, 1, None).unwrap()
    }

    #[test]
    fn test_last_write_wins_within_batch() {
        let writes = vec![
            PendingWrite::new("a", "status", "first"),
            PendingWrite::new("b", "status", "other"),
            PendingWrite::new("a", "status", "second"),
            PendingWrite::new("a", "status", "third"),
        ];

        let plan = resolve_batch(&writes, &snapshot());
        assert_eq!(plan.coalesced, 2);
        assert_eq!(plan.cells.len(), 2);
        assert_eq!(
            plan.cells[0],
            CellWrite {
                row: 2,
                column: 1,
                value: CellValue::Text("third".into()),
            }
        );
        assert_eq!(plan.cells[1].row, 3);
    }

    #[test]
    fn test_unresolvable_writes_dropped() {
        let writes = vec![
            PendingWrite::new("gone", "status", "x"),
            PendingWrite::new("a", "renamed", "y"),
            PendingWrite::new("a", "status", "z"),
        ];

        let plan = resolve_batch(&writes, &snapshot());
        assert_eq!(plan.cells.len(), 1);
        assert_eq!(plan.dropped.len(), 2);
        assert_eq!(plan.dropped[0].key, "gone");
        assert_eq!(plan.dropped[1].column, "renamed");
    }

    #[test]
    fn test_values_coerced_without_touching_intent() {
        let writes = vec![
            PendingWrite::new("a", "count", "42"),
            PendingWrite::new("b", "status", "TRUE"),
        ];

        let plan = resolve_batch(&writes, &snapshot());
        assert_eq!(plan.cells[0].value, CellValue::Number(42.0));
        assert_eq!(plan.cells[1].value, CellValue::Bool(true));
        assert_eq!(writes[0].value, "42");
    }

    #[test]
    fn test_empty_batch() {
        let plan = resolve_batch(&[], &snapshot());
        assert_eq!(plan, BatchPlan::default());
    }
}
