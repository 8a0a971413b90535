//! `$limit` and `$skip` (specification §4.4.4). Both are position-dependent:
//! inserting or removing an earlier row shifts which rows satisfy the
//! boundary, so neither supports an exact incremental update without
//! re-evaluating the tail of the input — `can_increment`/`can_decrement`
//! report `false` and the IVM layer re-runs these stages on change.

use crate::operator::{Hints, Operator, OperatorMetrics, PushOutput, Schema};
use aggvm_core::Result;
use aggvm_storage::ColumnarBatch;
use std::time::Instant;

/// Passes through at most `n` rows total across every push.
pub struct LimitOperator {
    n: usize,
    emitted: usize,
}

impl LimitOperator {
    /// A limit operator admitting at most `n` rows.
    pub fn new(n: usize) -> Self {
        LimitOperator { n, emitted: 0 }
    }
}

impl Operator for LimitOperator {
    fn init(&mut self, _schema: &Schema, _hints: &Hints) -> Result<()> {
        Ok(())
    }

    fn push(&mut self, mut batch: ColumnarBatch) -> Result<PushOutput> {
        let start = Instant::now();
        let rows_in = batch.selection().len();
        let remaining = self.n.saturating_sub(self.emitted);
        batch.selection_mut().truncate(remaining);
        self.emitted += batch.selection().len();
        let rows_out = batch.selection().len();
        Ok(PushOutput { batch, metrics: OperatorMetrics { rows_in, rows_out, elapsed: start.elapsed() } })
    }

    fn flush(&mut self) -> Result<Option<ColumnarBatch>> {
        Ok(None)
    }

    fn close(&mut self) {
        self.emitted = 0;
    }

    fn can_increment(&self) -> bool {
        false
    }

    fn can_decrement(&self) -> bool {
        false
    }
}

/// Drops the first `n` rows across every push, passing the rest through.
pub struct SkipOperator {
    n: usize,
    skipped: usize,
}

impl SkipOperator {
    /// A skip operator dropping the first `n` rows.
    pub fn new(n: usize) -> Self {
        SkipOperator { n, skipped: 0 }
    }
}

impl Operator for SkipOperator {
    fn init(&mut self, _schema: &Schema, _hints: &Hints) -> Result<()> {
        Ok(())
    }

    fn push(&mut self, mut batch: ColumnarBatch) -> Result<PushOutput> {
        let start = Instant::now();
        let rows_in = batch.selection().len();
        let still_to_skip = self.n.saturating_sub(self.skipped);
        let skip_now = still_to_skip.min(batch.selection().len());
        batch.selection_mut().skip_front(skip_now);
        self.skipped += skip_now;
        let rows_out = batch.selection().len();
        Ok(PushOutput { batch, metrics: OperatorMetrics { rows_in, rows_out, elapsed: start.elapsed() } })
    }

    fn flush(&mut self) -> Result<Option<ColumnarBatch>> {
        Ok(None)
    }

    fn close(&mut self) {
        self.skipped = 0;
    }

    fn can_increment(&self) -> bool {
        false
    }

    fn can_decrement(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggvm_core::{RowId, Value};

    fn batch_of(n: usize) -> ColumnarBatch {
        let mut batch = ColumnarBatch::new(64);
        for i in 0..n {
            let doc: aggvm_core::Document = [("n".to_string(), Value::Int(i as i64))].into_iter().collect();
            batch.push_row(RowId::physical(i as u32), doc.iter()).unwrap();
        }
        batch
    }

    #[test]
    fn limit_truncates_and_tracks_across_pushes() {
        let mut op = LimitOperator::new(3);
        let out1 = op.push(batch_of(2)).unwrap();
        assert_eq!(out1.batch.selection().len(), 2);
        let out2 = op.push(batch_of(5)).unwrap();
        assert_eq!(out2.batch.selection().len(), 1);
    }

    #[test]
    fn skip_drops_the_first_n_rows_across_pushes() {
        let mut op = SkipOperator::new(3);
        let out1 = op.push(batch_of(2)).unwrap();
        assert_eq!(out1.batch.selection().len(), 0);
        let out2 = op.push(batch_of(5)).unwrap();
        assert_eq!(out2.batch.selection().len(), 4);
    }

    #[test]
    fn limit_and_skip_are_not_incrementally_maintainable() {
        assert!(!LimitOperator::new(1).can_increment());
        assert!(!SkipOperator::new(1).can_decrement());
    }
}
