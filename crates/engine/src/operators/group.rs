//! `$group` (specification §4.4.3, §4.7). Blocking: accumulates across every
//! pushed batch and only emits on `flush`.

use crate::accumulator::FieldAccumulator;
use crate::expr::{eval, EvalScope, Expr};
use crate::operator::{Hints, Operator, OperatorMetrics, PushOutput, Schema};
use crate::plan::{Accumulator, GroupId};
use aggvm_core::{Document, Result, RowId, Value};
use aggvm_storage::{ColumnarBatch, GroupKey, RobinHoodMap};
use rustc_hash::FxHashMap;
use std::time::Instant;

fn field_accumulator_for(accum: &Accumulator) -> FieldAccumulator {
    match accum {
        Accumulator::Sum(_) => FieldAccumulator::new_sum(),
        Accumulator::Avg(_) => FieldAccumulator::new_avg(),
        Accumulator::Min(_) => FieldAccumulator::new_min(),
        Accumulator::Max(_) => FieldAccumulator::new_max(),
        Accumulator::First(_) => FieldAccumulator::new_first(),
        Accumulator::Last(_) => FieldAccumulator::new_last(),
        Accumulator::Count => FieldAccumulator::new_count(),
        Accumulator::Push(_) | Accumulator::AddToSet(_) => FieldAccumulator::new_count(),
    }
}

fn accum_source(accum: &Accumulator) -> Option<&Expr> {
    match accum {
        Accumulator::Sum(e)
        | Accumulator::Avg(e)
        | Accumulator::Min(e)
        | Accumulator::Max(e)
        | Accumulator::First(e)
        | Accumulator::Last(e)
        | Accumulator::Push(e)
        | Accumulator::AddToSet(e) => Some(e),
        Accumulator::Count => None,
    }
}

fn key_components(id: &GroupId, doc: &Document) -> Vec<Value> {
    match id {
        GroupId::Null => vec![Value::Null],
        GroupId::Field(path) => vec![doc.get_path(path).cloned().unwrap_or(Value::Null)],
        GroupId::Compound(parts) => parts.iter().map(|(_, path)| doc.get_path(path).cloned().unwrap_or(Value::Null)).collect(),
    }
}

fn key_document(id: &GroupId, key: &GroupKey) -> Value {
    match id {
        GroupId::Null => Value::Null,
        GroupId::Field(_) => key.components()[0].clone(),
        GroupId::Compound(parts) => {
            let mut doc = Document::new();
            for ((name, _), value) in parts.iter().zip(key.components()) {
                doc.insert(name.clone(), value.clone());
            }
            Value::Document(doc)
        }
    }
}

/// Approximate per-group memory cost (bytes) used to tighten
/// `max_groups` from `Hints::memory_budget` when `init` is given one,
/// mirroring `EngineConfig::bytes_per_group_estimate`'s default.
const BYTES_PER_GROUP_ESTIMATE: usize = 64;

/// Accumulates per-group state and, for decremental maintenance, remembers
/// each contributing row's key and per-field values so it can be undone in
/// `O(1)` amortized without rescanning the group.
pub struct GroupOperator {
    id_spec: GroupId,
    field_specs: Vec<(String, Accumulator)>,
    groups: RobinHoodMap<GroupKey, Vec<FieldAccumulator>>,
    contributions: FxHashMap<RowId, (GroupKey, Vec<Value>)>,
    max_groups: usize,
}

impl GroupOperator {
    /// A group operator grouping by `id_spec` and computing `field_specs`,
    /// failing `add_row` with `CapacityExceeded` once distinct groups would
    /// exceed `max_groups` (specification §4.4.3 — pass
    /// `EngineConfig::group_cardinality_limit`, itself already folding in a
    /// memory-budget-derived override when one was configured).
    pub fn new(id_spec: GroupId, field_specs: Vec<(String, Accumulator)>, max_groups: usize) -> Self {
        GroupOperator { id_spec, field_specs, groups: RobinHoodMap::new(), contributions: FxHashMap::default(), max_groups }
    }

    /// Fold one document's contribution into its group, creating the group
    /// if this is its first row. Returns `true` if this row started a new
    /// group (the downstream delta-engine case for emitting a `+1`), or
    /// `CapacityExceeded` if starting a new group would cross `max_groups`.
    pub fn add_row(&mut self, row_id: RowId, doc: &Document) -> Result<bool> {
        let key = GroupKey::new(key_components(&self.id_spec, doc));
        let is_new_group = self.groups.get(&key).is_none();
        if is_new_group && self.groups.len() >= self.max_groups {
            return Err(aggvm_core::Error::CapacityExceeded(format!(
                "$group exceeded its cardinality limit of {} distinct groups",
                self.max_groups
            )));
        }
        let values: Vec<Value> = self
            .field_specs
            .iter()
            .map(|(_, accum)| accum_source(accum).map(|e| eval(e, &EvalScope::new(doc))).unwrap_or(Value::Null))
            .collect();
        if is_new_group {
            let fresh: Vec<FieldAccumulator> = self.field_specs.iter().map(|(_, a)| field_accumulator_for(a)).collect();
            self.groups.insert(key.clone(), fresh);
        }
        let accs = self.groups.get_mut(&key).unwrap();
        for (acc, value) in accs.iter_mut().zip(&values) {
            acc.add(row_id, value);
        }
        self.contributions.insert(row_id, (key, values));
        Ok(is_new_group)
    }

    /// Undo a previously added row's contribution, per spec §4.7's
    /// decremental `$group` semantics. Tears down the group entirely once
    /// every field accumulator empties out, returning `true` in that case
    /// (the downstream delta-engine case for emitting a `-1`).
    pub fn remove_row(&mut self, row_id: RowId) -> bool {
        let Some((key, values)) = self.contributions.remove(&row_id) else { return false };
        let Some(accs) = self.groups.get_mut(&key) else { return false };
        for (acc, value) in accs.iter_mut().zip(&values) {
            acc.remove(row_id, value);
        }
        if accs.iter().all(FieldAccumulator::is_empty) {
            self.groups.remove(&key);
            true
        } else {
            false
        }
    }

    /// The current materialized document for the group `row_id` last
    /// contributed to, or `None` if that group no longer exists.
    pub fn group_row(&self, row_id: RowId) -> Option<Document> {
        let (key, _) = self.contributions.get(&row_id)?;
        let accs = self.groups.get(key)?;
        let mut row = Document::new();
        row.insert("_id", key_document(&self.id_spec, key));
        for ((name, _), acc) in self.field_specs.iter().zip(accs) {
            row.insert(name.clone(), acc.finalize());
        }
        Some(row)
    }

    /// Materialize every live group into output rows.
    fn emit(&self) -> Result<ColumnarBatch> {
        let mut out = ColumnarBatch::new(self.groups.len().max(1));
        for (key, accs) in self.groups.iter() {
            let mut row = Document::new();
            row.insert("_id", key_document(&self.id_spec, key));
            for ((name, _), acc) in self.field_specs.iter().zip(accs) {
                row.insert(name.clone(), acc.finalize());
            }
            out.push_row(RowId::physical(out.len() as u32), row.iter())?;
        }
        Ok(out)
    }
}

impl Operator for GroupOperator {
    fn init(&mut self, _schema: &Schema, hints: &Hints) -> Result<()> {
        if hints.memory_budget != usize::MAX {
            let budget_groups = (hints.memory_budget / BYTES_PER_GROUP_ESTIMATE).max(1);
            self.max_groups = self.max_groups.min(budget_groups);
        }
        Ok(())
    }

    fn push(&mut self, batch: ColumnarBatch) -> Result<PushOutput> {
        let start = Instant::now();
        let rows_in = batch.selection().len();
        for slot in batch.selection().iter() {
            let doc = super::row_document(&batch, slot);
            self.add_row(super::row_id(&batch, slot), &doc)?;
        }
        Ok(PushOutput {
            batch: ColumnarBatch::new(1),
            metrics: OperatorMetrics { rows_in, rows_out: 0, elapsed: start.elapsed() },
        })
    }

    fn flush(&mut self) -> Result<Option<ColumnarBatch>> {
        Ok(Some(self.emit()?))
    }

    fn close(&mut self) {
        self.groups = RobinHoodMap::new();
        self.contributions.clear();
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

    fn doc(country: &str, amount: i64) -> Document {
        [("country".to_string(), Value::String(country.into())), ("amount".to_string(), Value::Int(amount))]
            .into_iter()
            .collect()
    }

    #[test]
    fn sums_per_group() {
        let mut op = GroupOperator::new(GroupId::Field("country".into()), vec![("total".into(), Accumulator::Sum(Expr::Field("amount".into())))], usize::MAX);
        op.add_row(RowId::physical(0), &doc("us", 10)).unwrap();
        op.add_row(RowId::physical(1), &doc("us", 5)).unwrap();
        op.add_row(RowId::physical(2), &doc("fr", 2)).unwrap();
        let out = op.emit().unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn removing_a_row_updates_the_group_without_rescanning() {
        let mut op = GroupOperator::new(GroupId::Null, vec![("total".into(), Accumulator::Sum(Expr::Field("amount".into())))], usize::MAX);
        op.add_row(RowId::physical(0), &doc("us", 10)).unwrap();
        op.add_row(RowId::physical(1), &doc("us", 5)).unwrap();
        let torn_down = op.remove_row(RowId::physical(0));
        assert!(!torn_down, "one contributing row is still live");
        let out = op.emit().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.column("total").unwrap().get(0), Some(Value::Double(5.0)));
    }

    #[test]
    fn group_is_torn_down_once_every_contributing_row_is_removed() {
        let mut op = GroupOperator::new(GroupId::Null, vec![("n".into(), Accumulator::Count)], usize::MAX);
        op.add_row(RowId::physical(0), &doc("us", 1)).unwrap();
        op.remove_row(RowId::physical(0));
        assert_eq!(op.groups.len(), 0);
    }

    #[test]
    fn add_row_rejects_a_new_group_once_the_cardinality_limit_is_reached() {
        let mut op = GroupOperator::new(GroupId::Field("country".into()), vec![("total".into(), Accumulator::Sum(Expr::Field("amount".into())))], 1);
        op.add_row(RowId::physical(0), &doc("us", 10)).unwrap();
        // A second row in the same group does not create a new one.
        op.add_row(RowId::physical(1), &doc("us", 5)).unwrap();
        let err = op.add_row(RowId::physical(2), &doc("fr", 2)).unwrap_err();
        assert_eq!(err.code(), "CapacityExceeded");
    }
}
