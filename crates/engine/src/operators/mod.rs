//! Built-in operators (specification §4.4): one module per pipeline stage,
//! all implementing the [`crate::operator::Operator`] ABI.

mod group;
mod limit_skip;
mod lookup;
mod match_op;
mod project;
mod sort;
mod unwind;

pub use group::GroupOperator;
pub use limit_skip::{LimitOperator, SkipOperator};
pub use lookup::LookupOperator;
pub use match_op::MatchOperator;
pub use project::ProjectOperator;
pub use sort::SortOperator;
pub use unwind::UnwindOperator;

use aggvm_core::{Document, RowId, Value};
use aggvm_storage::ColumnarBatch;

/// Reconstruct the scalar fields of physical slot `slot` of `batch` as a
/// [`Document`], for operators that need to evaluate a general [`crate::expr::Expr`]
/// or [`crate::expr::Predicate`] rather than reading a single column. Only
/// columnar (scalar) fields are recovered; arrays and nested documents live
/// in the base store, not the batch.
pub(crate) fn row_document(batch: &ColumnarBatch, slot: u32) -> Document {
    let mut doc = Document::new();
    for field in batch.field_names().map(|s| s.to_string()).collect::<Vec<_>>() {
        if let Some(value) = batch.column(&field).and_then(|c| c.get(slot as usize)) {
            doc.insert(field, value);
        }
    }
    doc
}

/// Row id of physical slot `slot`.
pub(crate) fn row_id(batch: &ColumnarBatch, slot: u32) -> RowId {
    batch.row_id(slot as usize)
}

/// Append one output row to `out`, evaluating `fields` (name, value) pairs
/// against the source document.
pub(crate) fn push_fields(out: &mut ColumnarBatch, id: RowId, fields: &[(String, Value)]) -> aggvm_core::Result<()> {
    let refs: Vec<(&str, &Value)> = fields.iter().map(|(k, v)| (k.as_str(), v)).collect();
    out.push_row(id, refs.into_iter())?;
    Ok(())
}
