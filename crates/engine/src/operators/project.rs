//! `$project` (specification §4.4.1).

use crate::expr::{eval, EvalScope, Expr};
use crate::operator::{Hints, Operator, OperatorMetrics, PushOutput, Schema};
use aggvm_core::{Document, Result, Value};
use aggvm_storage::ColumnarBatch;
use std::time::Instant;

/// Rewrites each row to the declared shape: plain inclusions pass a column
/// through unchanged, computed fields are evaluated fresh per row. Stateless
/// row-by-row, so increment/decrement never need a re-scan.
pub struct ProjectOperator {
    include_id: bool,
    includes: Vec<String>,
    computed: Vec<(String, Expr)>,
}

impl ProjectOperator {
    /// A project operator with the given inclusion/computed-field shape.
    pub fn new(include_id: bool, includes: Vec<String>, computed: Vec<(String, Expr)>) -> Self {
        ProjectOperator { include_id, includes, computed }
    }
}

impl Operator for ProjectOperator {
    fn init(&mut self, _schema: &Schema, _hints: &Hints) -> Result<()> {
        Ok(())
    }

    fn push(&mut self, batch: ColumnarBatch) -> Result<PushOutput> {
        let start = Instant::now();
        let rows_in = batch.selection().len();
        let mut out = ColumnarBatch::new(rows_in.max(1));
        let slots: Vec<u32> = batch.selection().iter().collect();
        for slot in &slots {
            let source = super::row_document(&batch, *slot);
            let mut row = Document::new();
            if self.include_id {
                if let Some(id) = source.get("_id") {
                    row.insert("_id", id.clone());
                }
            }
            for field in &self.includes {
                if let Some(value) = source.get_path(field) {
                    row.insert(field.clone(), value.clone());
                }
            }
            for (name, expr) in &self.computed {
                let scope = EvalScope::new(&source);
                row.insert(name.clone(), eval(expr, &scope));
            }
            out.push_row(super::row_id(&batch, *slot), row.iter())?;
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
