//! `$match` (specification §4.4.1).

use crate::expr::Predicate;
use crate::operator::{Hints, Operator, OperatorMetrics, PushOutput, Schema};
use aggvm_core::Result;
use aggvm_storage::ColumnarBatch;
use std::time::Instant;

/// Filters rows by narrowing the selection vector; never rewrites column
/// data. Stateless, so both increment and decrement are exact without a
/// re-scan: re-evaluate the predicate against the delta row alone.
pub struct MatchOperator {
    predicate: Predicate,
}

impl MatchOperator {
    /// A match operator evaluating `predicate` against each row.
    pub fn new(predicate: Predicate) -> Self {
        MatchOperator { predicate }
    }
}

impl Operator for MatchOperator {
    fn init(&mut self, _schema: &Schema, _hints: &Hints) -> Result<()> {
        Ok(())
    }

    fn push(&mut self, mut batch: ColumnarBatch) -> Result<PushOutput> {
        let start = Instant::now();
        let rows_in = batch.selection().len();
        // Evaluate the predicate for every currently selected slot before
        // narrowing the selection, since `retain`'s closure cannot also
        // borrow `batch` to read column data.
        let keep: Vec<bool> = batch
            .selection()
            .iter()
            .map(|slot| self.predicate.eval_document(&super::row_document(&batch, slot)))
            .collect();
        let mut next = keep.into_iter();
        batch.selection_mut().retain(|_| next.next().unwrap_or(false));
        let rows_out = batch.selection().len();
        Ok(PushOutput {
            batch,
            metrics: OperatorMetrics { rows_in, rows_out, elapsed: start.elapsed() },
        })
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
    use aggvm_core::{RowId, Value};

    fn batch_with(rows: &[(i64, &str)]) -> ColumnarBatch {
        let mut batch = ColumnarBatch::new(1024);
        for (i, (n, s)) in rows.iter().enumerate() {
            let doc: aggvm_core::Document =
                [("n".to_string(), Value::Int(*n)), ("s".to_string(), Value::String((*s).into()))]
                    .into_iter()
                    .collect();
            batch.push_row(RowId::physical(i as u32), doc.iter()).unwrap();
        }
        batch
    }

    #[test]
    fn narrows_selection_without_touching_columns() {
        let batch = batch_with(&[(1, "a"), (5, "b"), (9, "c")]);
        let mut op = MatchOperator::new(Predicate::Gte("n".into(), Value::Int(5)));
        op.init(&Schema::default(), &Hints::new(8)).unwrap();
        let out = op.push(batch).unwrap();
        assert_eq!(out.batch.selection().len(), 2);
        assert_eq!(out.metrics.rows_in, 3);
        assert_eq!(out.metrics.rows_out, 2);
    }

    #[test]
    fn is_increment_and_decrement_capable() {
        let op = MatchOperator::new(Predicate::Eq("n".into(), Value::Int(1)));
        assert!(op.can_increment());
        assert!(op.can_decrement());
    }
}
