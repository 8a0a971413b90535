//! Per-field IVM index (specification §3 "Dimension").
//!
//! A dimension indexes one field path across the live set: `value → set of
//! RowIds`, a sorted value list for range scans, and the reverse map so a
//! row's old value can be found and removed when it changes. Operators
//! consult dimensions to avoid a full rescan when a delta only narrows or
//! widens a predicate/group/sort key.

use crate::accumulator::ComparableValue;
use aggvm_core::{RowId, Value};
use std::collections::BTreeMap;
use rustc_hash::FxHashMap;

/// An index over one field path: `value → {RowId}`, kept in sorted order.
#[derive(Debug, Default)]
pub struct Dimension {
    by_value: BTreeMap<ComparableValue, Vec<RowId>>,
    by_row: FxHashMap<RowId, Value>,
}

impl Dimension {
    /// An empty dimension.
    pub fn new() -> Self {
        Dimension::default()
    }

    /// Index `row_id` under `value`, first removing any prior indexing for
    /// that row (a dimension tracks one current value per row).
    pub fn insert(&mut self, row_id: RowId, value: Value) {
        self.remove(row_id);
        self.by_value.entry(ComparableValue(value.clone())).or_default().push(row_id);
        self.by_row.insert(row_id, value);
    }

    /// Remove `row_id` from the index, wherever it is currently indexed.
    pub fn remove(&mut self, row_id: RowId) {
        if let Some(old) = self.by_row.remove(&row_id) {
            let key = ComparableValue(old);
            if let Some(rows) = self.by_value.get_mut(&key) {
                rows.retain(|r| *r != row_id);
                if rows.is_empty() {
                    self.by_value.remove(&key);
                }
            }
        }
    }

    /// Every row currently indexed under exactly `value`.
    pub fn rows_for(&self, value: &Value) -> &[RowId] {
        self.by_value.get(&ComparableValue(value.clone())).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All rows whose value compares less than `value` (ascending, by
    /// sorted value order) — the basis for range-scan predicates.
    pub fn rows_less_than(&self, value: &Value) -> Vec<RowId> {
        let bound = ComparableValue(value.clone());
        self.by_value.range(..bound).flat_map(|(_, rows)| rows.iter().copied()).collect()
    }

    /// The value currently indexed for `row_id`, if any.
    pub fn value_of(&self, row_id: RowId) -> Option<&Value> {
        self.by_row.get(&row_id)
    }

    /// Number of distinct values currently indexed.
    pub fn cardinality(&self) -> usize {
        self.by_value.len()
    }

    /// Number of rows currently indexed.
    pub fn len(&self) -> usize {
        self.by_row.len()
    }

    /// `true` if the dimension indexes no rows.
    pub fn is_empty(&self) -> bool {
        self.by_row.is_empty()
    }
}
