//! `$lookup`, equality form only (specification §4.4.6). The `let`/`pipeline`
//! form is rejected by the compiler's eligibility check
//! ([`crate::plan::Stage::is_equality_lookup`]) and runs through the
//! fallback interpreter instead.

use crate::operator::{Hints, Operator, OperatorMetrics, PushOutput, Schema};
use aggvm_core::{Document, Result, RowId, Value};
use aggvm_storage::{ColumnarBatch, GroupKey, RobinHoodMap};
use rustc_hash::FxHashMap;
use std::time::Instant;

/// Joins each row against a foreign document set by equality on
/// `local_field == foreign_field`. The foreign side is hashed once in
/// `init`, so each probe is `O(1)` amortized regardless of how many rows
/// share a join key. The joined array is not columnar (arrays never are, per
/// §4.1), so matches are tracked out of band in `last_matches` and attached
/// to the output document at materialization time rather than stored as a
/// batch column.
pub struct LookupOperator {
    local_field: String,
    foreign_field: String,
    as_field: String,
    foreign_docs: Vec<Document>,
    index: RobinHoodMap<GroupKey, Vec<usize>>,
    last_matches: FxHashMap<RowId, Vec<Value>>,
}

impl LookupOperator {
    /// A lookup operator joining on `local_field == foreign_field` against
    /// `foreign_docs`, attaching matches under `as_field`.
    pub fn new(local_field: String, foreign_field: String, as_field: String, foreign_docs: Vec<Document>) -> Self {
        LookupOperator { local_field, foreign_field, as_field, foreign_docs, index: RobinHoodMap::new(), last_matches: FxHashMap::default() }
    }

    /// The joined array for `row_id`, as produced by the most recent `push`
    /// that processed it. `None` if the row has never been joined (or its
    /// match set was empty, in which case this returns `Some(&[])`).
    pub fn matches_for(&self, row_id: RowId) -> Option<&[Value]> {
        self.last_matches.get(&row_id).map(Vec::as_slice)
    }

    /// The output field name the joined array is attached under.
    pub fn as_field(&self) -> &str {
        &self.as_field
    }

    /// Probe the hashed foreign side directly for a given local value,
    /// without requiring a batch — used by the IVM delta engine, which
    /// threads one row at a time rather than columnar batches.
    pub fn probe(&self, local_value: &Value) -> Vec<Document> {
        let key = GroupKey::new(vec![local_value.clone()]);
        self.index.get(&key).map(|idxs| idxs.iter().map(|&i| self.foreign_docs[i].clone()).collect()).unwrap_or_default()
    }

    fn build_index(&mut self) {
        self.index = RobinHoodMap::new();
        for (i, doc) in self.foreign_docs.iter().enumerate() {
            let key = GroupKey::new(vec![doc.get_path(&self.foreign_field).cloned().unwrap_or(Value::Null)]);
            match self.index.get_mut(&key) {
                Some(list) => list.push(i),
                None => {
                    self.index.insert(key, vec![i]);
                }
            }
        }
    }
}

impl Operator for LookupOperator {
    fn init(&mut self, _schema: &Schema, _hints: &Hints) -> Result<()> {
        self.build_index();
        Ok(())
    }

    fn push(&mut self, batch: ColumnarBatch) -> Result<PushOutput> {
        let start = Instant::now();
        let rows_in = batch.selection().len();
        let mut out = ColumnarBatch::new(rows_in.max(1));
        let slots: Vec<u32> = batch.selection().iter().collect();
        for slot in slots {
            let doc = super::row_document(&batch, slot);
            let local_value = doc.get_path(&self.local_field).cloned().unwrap_or(Value::Null);
            let key = GroupKey::new(vec![local_value]);
            let matches: Vec<Value> = self
                .index
                .get(&key)
                .map(|idxs| idxs.iter().map(|&i| Value::Document(self.foreign_docs[i].clone())).collect())
                .unwrap_or_default();
            let row_id = super::row_id(&batch, slot);
            self.last_matches.insert(row_id, matches);
            out.push_row(row_id, doc.iter())?;
        }
        let rows_out = out.selection().len();
        Ok(PushOutput { batch: out, metrics: OperatorMetrics { rows_in, rows_out, elapsed: start.elapsed() } })
    }

    fn flush(&mut self) -> Result<Option<ColumnarBatch>> {
        Ok(None)
    }

    fn close(&mut self) {}

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
    use aggvm_core::RowId;

    fn foreign(id: i64, user_id: i64) -> Document {
        [("id".to_string(), Value::Int(id)), ("userId".to_string(), Value::Int(user_id))].into_iter().collect()
    }

    #[test]
    fn attaches_matching_foreign_documents() {
        let mut op = LookupOperator::new(
            "id".into(),
            "userId".into(),
            "orders".into(),
            vec![foreign(100, 1), foreign(101, 1), foreign(200, 2)],
        );
        op.init(&Schema::default(), &Hints::new(8)).unwrap();

        let mut batch = ColumnarBatch::new(8);
        let doc: Document = [("id".to_string(), Value::Int(1))].into_iter().collect();
        batch.push_row(RowId::physical(0), doc.iter()).unwrap();

        op.push(batch).unwrap();
        assert_eq!(op.matches_for(RowId::physical(0)).map(<[_]>::len), Some(2));
    }

    #[test]
    fn rows_with_no_match_get_an_empty_array() {
        let mut op = LookupOperator::new("id".into(), "userId".into(), "orders".into(), vec![foreign(100, 1)]);
        op.init(&Schema::default(), &Hints::new(8)).unwrap();
        let mut batch = ColumnarBatch::new(8);
        let doc: Document = [("id".to_string(), Value::Int(99))].into_iter().collect();
        batch.push_row(RowId::physical(0), doc.iter()).unwrap();
        op.push(batch).unwrap();
        assert_eq!(op.matches_for(RowId::physical(0)), Some(&[][..]));
    }
}
