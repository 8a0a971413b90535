//! `$sort` (specification §4.4.4, §4.7). Blocking: buffers every row in an
//! order-statistics tree and emits in sorted order on flush, so a following
//! `$limit` can read off a prefix in `O(k log n)` instead of resorting.

use crate::operator::{Hints, Operator, OperatorMetrics, PushOutput, Schema};
use aggvm_core::{Document, Result, RowId, Value};
use aggvm_storage::{ColumnarBatch, OrderStatTree};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
struct SortKey {
    values: Vec<Value>,
    directions: Arc<Vec<i8>>,
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for ((a, b), dir) in self.values.iter().zip(&other.values).zip(self.directions.iter()) {
            let ord = a.total_cmp(b).unwrap_or(Ordering::Equal);
            let ord = if *dir < 0 { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Sorts rows lexicographically by the declared key fields, each with its
/// own ascending (`1`) or descending (`-1`) direction.
pub struct SortOperator {
    keys: Vec<(String, i8)>,
    directions: Arc<Vec<i8>>,
    tree: OrderStatTree<SortKey>,
    docs: FxHashMap<RowId, Document>,
}

impl SortOperator {
    /// A sort operator ordering by `keys` (field path, direction).
    pub fn new(keys: Vec<(String, i8)>) -> Self {
        let directions = Arc::new(keys.iter().map(|(_, d)| *d).collect());
        SortOperator { keys, directions, tree: OrderStatTree::new(), docs: FxHashMap::default() }
    }

    fn key_for(&self, doc: &Document) -> SortKey {
        let values = self.keys.iter().map(|(field, _)| doc.get_path(field).cloned().unwrap_or(Value::Null)).collect();
        SortKey { values, directions: self.directions.clone() }
    }

    /// Insert one row into the sorted order.
    pub fn add_row(&mut self, row_id: RowId, doc: Document) {
        let key = self.key_for(&doc);
        self.tree.insert(key, row_id);
        self.docs.insert(row_id, doc);
    }

    /// Remove a previously added row (decremental `$sort` maintenance).
    pub fn remove_row(&mut self, row_id: RowId) {
        if let Some(doc) = self.docs.remove(&row_id) {
            let key = self.key_for(&doc);
            self.tree.remove(key, row_id);
        }
    }

    /// The rank (0-based position in sorted order) of a row last added via
    /// [`Self::add_row`], used to decide top-k window membership.
    pub fn rank_of(&self, row_id: RowId) -> Option<usize> {
        let doc = self.docs.get(&row_id)?;
        Some(self.tree.rank(self.key_for(doc), row_id))
    }

    /// The row currently at sorted position `index`, if any.
    pub fn row_at(&self, index: usize) -> Option<(RowId, Document)> {
        let (_, row_id) = self.tree.kth(index)?;
        self.docs.get(&row_id).map(|doc| (row_id, doc.clone()))
    }

    fn emit(&self) -> Result<ColumnarBatch> {
        let mut out = ColumnarBatch::new(self.tree.len().max(1));
        for (_, row_id) in self.tree.iter() {
            let doc = &self.docs[&row_id];
            out.push_row(row_id, doc.iter())?;
        }
        Ok(out)
    }
}

impl Operator for SortOperator {
    fn init(&mut self, _schema: &Schema, _hints: &Hints) -> Result<()> {
        Ok(())
    }

    fn push(&mut self, batch: ColumnarBatch) -> Result<PushOutput> {
        let start = Instant::now();
        let rows_in = batch.selection().len();
        for slot in batch.selection().iter() {
            let doc = super::row_document(&batch, slot);
            self.add_row(super::row_id(&batch, slot), doc);
        }
        Ok(PushOutput { batch: ColumnarBatch::new(1), metrics: OperatorMetrics { rows_in, rows_out: 0, elapsed: start.elapsed() } })
    }

    fn flush(&mut self) -> Result<Option<ColumnarBatch>> {
        Ok(Some(self.emit()?))
    }

    fn close(&mut self) {
        self.tree = OrderStatTree::new();
        self.docs.clear();
    }

    fn can_increment(&self) -> bool {
        true
    }

    fn can_decrement(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(n: i64) -> Document {
        [("n".to_string(), Value::Int(n))].into_iter().collect()
    }

    #[test]
    fn emits_in_ascending_order() {
        let mut op = SortOperator::new(vec![("n".into(), 1)]);
        op.add_row(RowId::physical(0), doc(5));
        op.add_row(RowId::physical(1), doc(1));
        op.add_row(RowId::physical(2), doc(3));
        let out = op.emit().unwrap();
        let values: Vec<_> = (0..out.len()).map(|i| out.column("n").unwrap().get(i)).collect();
        assert_eq!(values, vec![Some(Value::Int(1)), Some(Value::Int(3)), Some(Value::Int(5))]);
    }

    #[test]
    fn descending_direction_reverses_order() {
        let mut op = SortOperator::new(vec![("n".into(), -1)]);
        op.add_row(RowId::physical(0), doc(1));
        op.add_row(RowId::physical(1), doc(3));
        let out = op.emit().unwrap();
        assert_eq!(out.column("n").unwrap().get(0), Some(Value::Int(3)));
    }

    #[test]
    fn removing_a_row_keeps_remaining_order_without_resorting() {
        let mut op = SortOperator::new(vec![("n".into(), 1)]);
        op.add_row(RowId::physical(0), doc(5));
        op.add_row(RowId::physical(1), doc(1));
        op.remove_row(RowId::physical(1));
        let out = op.emit().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.column("n").unwrap().get(0), Some(Value::Int(5)));
    }
}
