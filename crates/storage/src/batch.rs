//! The columnar batch (specification §3 "ColumnarBatch", §4.1).
//!
//! A batch pairs a `field → column vector` mapping with one selection
//! vector and a parallel `row_ids` array that tracks which [`RowId`]
//! produced each physical slot, so late materialization (§4.6) can recover
//! the originating document. Only scalar fields are stored columnarly;
//! arrays and nested documents are left to the base document and overlay.

use crate::column::{ColumnKind, ColumnVector};
use crate::selection::SelectionVector;
use aggvm_core::{Error, Result, RowId, Value};
use rustc_hash::FxHashMap;

/// A fixed-capacity, growable-on-write batch of rows, stored column-major.
#[derive(Debug, Clone)]
pub struct ColumnarBatch {
    max_vector_capacity: usize,
    len: usize,
    columns: Vec<(String, ColumnVector)>,
    index: FxHashMap<String, usize>,
    row_ids: Vec<RowId>,
    selection: SelectionVector,
}

/// Infer the column kind a scalar value would be stored as. Returns `None`
/// for values with no columnar representation (`Null`, `Array`, `Document`),
/// which late materialization recovers from the base document instead.
pub fn value_kind(value: &Value) -> Option<ColumnKind> {
    match value {
        Value::Bool(_) => Some(ColumnKind::Bool),
        Value::Int(_) | Value::Timestamp(_) => Some(ColumnKind::I64),
        Value::Double(_) => Some(ColumnKind::F64),
        Value::String(_) => Some(ColumnKind::Utf8),
        Value::Null | Value::Array(_) | Value::Document(_) => None,
    }
}

impl ColumnarBatch {
    /// Create an empty batch with the given vector capacity ceiling.
    pub fn new(max_vector_capacity: usize) -> Self {
        ColumnarBatch {
            max_vector_capacity,
            len: 0,
            columns: Vec::new(),
            index: FxHashMap::default(),
            row_ids: Vec::new(),
            selection: SelectionVector::new(),
        }
    }

    /// Number of rows physically stored (selected or not).
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` if no rows have been stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The active selection.
    pub fn selection(&self) -> &SelectionVector {
        &self.selection
    }

    /// Mutable access to the active selection, for operators that filter by
    /// shrinking it in place.
    pub fn selection_mut(&mut self) -> &mut SelectionVector {
        &mut self.selection
    }

    /// Replace the selection wholesale (used when an operator produces a
    /// freshly derived selection, e.g. after a sort).
    pub fn set_selection(&mut self, selection: SelectionVector) {
        self.selection = selection;
    }

    /// The originating [`RowId`] for physical slot `i`.
    pub fn row_id(&self, i: usize) -> RowId {
        self.row_ids[i]
    }

    /// Iterate field names in column-declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Borrow a column by field name.
    pub fn column(&self, field: &str) -> Option<&ColumnVector> {
        self.index.get(field).map(|&i| &self.columns[i].1)
    }

    /// Mutably borrow a column by field name.
    pub fn column_mut(&mut self, field: &str) -> Option<&mut ColumnVector> {
        self.index.get(field).map(|&i| &mut self.columns[i].1)
    }

    /// Ensure a column of the given kind exists for `field`, creating and
    /// back-filling it (as all-invalid) to the batch's current length if
    /// necessary. Returns an error if the field exists with a different
    /// kind.
    pub fn ensure_column(&mut self, field: &str, kind: ColumnKind) -> Result<&mut ColumnVector> {
        if let Some(&i) = self.index.get(field) {
            if self.columns[i].1.kind() != kind {
                return Err(Error::internal(
                    "I1",
                    format!(
                        "field {field} already has kind {:?}, cannot reuse as {kind:?}",
                        self.columns[i].1.kind()
                    ),
                ));
            }
            return Ok(&mut self.columns[i].1);
        }
        let mut col = ColumnVector::new(kind, self.len);
        col.resize(self.len, self.max_vector_capacity)?;
        self.columns.push((field.to_string(), col));
        let i = self.columns.len() - 1;
        self.index.insert(field.to_string(), i);
        Ok(&mut self.columns[i].1)
    }

    /// Append a new row at the next physical slot, storing only its scalar
    /// fields columnarly and growing every existing column (double-on-write)
    /// to cover the new length. The row is added to the selection. Returns
    /// the physical slot index.
    pub fn push_row<'a>(
        &mut self,
        row_id: RowId,
        fields: impl Iterator<Item = (&'a str, &'a Value)>,
    ) -> Result<u32> {
        let slot = self.len;
        let new_len = self.len + 1;
        self.grow_existing_columns(new_len)?;
        for (name, value) in fields {
            if let Some(kind) = value_kind(value) {
                self.ensure_column(name, kind)?;
                self.column_mut(name).unwrap().set(slot, Some(value))?;
            }
        }
        self.row_ids.push(row_id);
        self.len = new_len;
        self.selection.push(slot as u32);
        Ok(slot as u32)
    }

    fn grow_existing_columns(&mut self, new_len: usize) -> Result<()> {
        for (_, col) in &mut self.columns {
            if col.len() < new_len {
                let target = (col.len().max(1) * 2).max(new_len);
                col.resize(target.min(self.max_vector_capacity.max(new_len)), self.max_vector_capacity)?;
            }
        }
        Ok(())
    }

    /// Validate invariant I1: every column referenced by name is at least as
    /// long as the largest active selection index.
    pub fn check_invariants(&self) -> Result<()> {
        let Some(max_index) = self.selection.max_index() else {
            return Ok(());
        };
        for (name, col) in &self.columns {
            if (max_index as usize) >= col.len() {
                return Err(Error::internal(
                    "I1",
                    format!(
                        "column {name} has length {} but selection references index {max_index}",
                        col.len()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Reset the batch for reuse: selection and row ids are cleared, every
    /// column's validity (and string pool) is cleared, but column storage
    /// and capacity are retained (clear-on-reuse).
    pub fn clear(&mut self) {
        self.len = 0;
        self.selection.clear();
        self.row_ids.clear();
        for (_, col) in &mut self.columns {
            col.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggvm_core::Document;

    fn doc(fields: &[(&str, Value)]) -> Document {
        fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn push_row_creates_columns_lazily() {
        let mut batch = ColumnarBatch::new(1024);
        let d = doc(&[("a", Value::Int(1)), ("b", Value::String("x".into()))]);
        batch.push_row(RowId::physical(0), d.iter()).unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.column("a").unwrap().get(0), Some(Value::Int(1)));
        assert_eq!(batch.column("b").unwrap().get(0), Some(Value::String("x".into())));
        assert_eq!(batch.row_id(0), RowId::physical(0));
    }

    #[test]
    fn push_row_skips_non_scalar_fields() {
        let mut batch = ColumnarBatch::new(1024);
        let d = doc(&[("tags", Value::Array(Default::default()))]);
        batch.push_row(RowId::physical(0), d.iter()).unwrap();
        assert!(batch.column("tags").is_none());
    }

    #[test]
    fn later_rows_backfill_missing_fields_as_null() {
        let mut batch = ColumnarBatch::new(1024);
        let d1 = doc(&[("a", Value::Int(1))]);
        let d2 = doc(&[("a", Value::Int(2)), ("b", Value::Int(9))]);
        batch.push_row(RowId::physical(0), d1.iter()).unwrap();
        batch.push_row(RowId::physical(1), d2.iter()).unwrap();

        // "b" column created on the second row; first row's slot stays null
        assert_eq!(batch.column("b").unwrap().get(0), None);
        assert_eq!(batch.column("b").unwrap().get(1), Some(Value::Int(9)));
    }

    #[test]
    fn invariants_hold_after_pushes() {
        let mut batch = ColumnarBatch::new(1024);
        for i in 0..10 {
            let d = doc(&[("a", Value::Int(i))]);
            batch.push_row(RowId::physical(i as u32), d.iter()).unwrap();
        }
        batch.check_invariants().unwrap();
    }

    #[test]
    fn clear_resets_selection_and_validity_but_keeps_capacity() {
        let mut batch = ColumnarBatch::new(1024);
        let d = doc(&[("a", Value::Int(1))]);
        batch.push_row(RowId::physical(0), d.iter()).unwrap();
        let cap_before = batch.column("a").unwrap().len();
        batch.clear();
        assert_eq!(batch.len(), 0);
        assert!(batch.selection().is_empty());
        assert_eq!(batch.column("a").unwrap().len(), cap_before);
        assert_eq!(batch.column("a").unwrap().get(0), None);
    }

    #[test]
    fn ensure_column_rejects_kind_conflicts() {
        let mut batch = ColumnarBatch::new(1024);
        batch.ensure_column("a", ColumnKind::I64).unwrap();
        let err = batch.ensure_column("a", ColumnKind::Utf8).unwrap_err();
        assert_eq!(err.code(), "Internal");
    }
}
