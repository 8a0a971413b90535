//! `$unwind` (specification §4.4.5). Mints a virtual RowId per array
//! element via the shared [`DocumentStore`], since the columnar batch has no
//! representation for array contents.

use crate::base::DocumentStore;
use crate::operator::{Hints, Operator, OperatorMetrics, PushOutput, Schema};
use aggvm_core::{Result, Value};
use aggvm_storage::ColumnarBatch;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

/// Expands one array-valued field into one row per element, each carrying a
/// freshly minted virtual RowId addressing `(origin, index)`. Increment is
/// exact (a new source row mints its own virtual rows); decrement is exact
/// too as long as the IVM layer forgets the origin's virtual rows before
/// retiring the source row (`DocumentStore::forget_virtual` per element).
pub struct UnwindOperator {
    field: String,
    preserve_null_and_empty: bool,
    include_array_index: Option<String>,
    store: Rc<RefCell<DocumentStore>>,
}

impl UnwindOperator {
    /// An unwind operator over `field`, sharing `store` with the rest of the
    /// pipeline for virtual-row minting and base-document lookups.
    pub fn new(field: String, preserve_null_and_empty: bool, include_array_index: Option<String>, store: Rc<RefCell<DocumentStore>>) -> Self {
        UnwindOperator { field, preserve_null_and_empty, include_array_index, store }
    }
}

impl Operator for UnwindOperator {
    fn init(&mut self, _schema: &Schema, _hints: &Hints) -> Result<()> {
        Ok(())
    }

    fn push(&mut self, batch: ColumnarBatch) -> Result<PushOutput> {
        let start = Instant::now();
        let rows_in = batch.selection().len();
        let mut out = ColumnarBatch::new(rows_in.max(1));
        let slots: Vec<u32> = batch.selection().iter().collect();
        let mut store = self.store.borrow_mut();
        for slot in slots {
            let origin = super::row_id(&batch, slot);
            let doc = store.get(origin).unwrap_or_else(|| super::row_document(&batch, slot));
            let array = doc.get_path(&self.field).and_then(Value::as_array).map(|s| s.to_vec());
            match array {
                Some(items) if !items.is_empty() => {
                    for (index, item) in items.into_iter().enumerate() {
                        let virt = store.mint_virtual(origin, index as u32, &self.field);
                        let mut row = doc.clone();
                        row.insert(self.field.clone(), item);
                        if let Some(idx_field) = &self.include_array_index {
                            row.insert(idx_field.clone(), Value::Int(index as i64));
                        }
                        out.push_row(virt, row.iter())?;
                    }
                }
                _ if self.preserve_null_and_empty => {
                    let mut row = doc.clone();
                    row.insert(self.field.clone(), Value::Null);
                    if let Some(idx_field) = &self.include_array_index {
                        row.insert(idx_field.clone(), Value::Null);
                    }
                    out.push_row(origin, row.iter())?;
                }
                _ => {}
            }
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
