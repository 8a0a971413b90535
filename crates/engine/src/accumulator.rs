//! Columnar `$group` accumulator kernels (specification §4.4.3, §4.7).
//!
//! Each accumulator tracks enough state to both finalize a value and, for
//! `$min`/`$max`/`$first`/`$last`, undo a single row's contribution without
//! rescanning the group — the basis for decremental `$group` maintenance
//! under IVM.

use aggvm_core::{RowId, Value};
use aggvm_storage::RefCountedMultiSet;
use std::cmp::Ordering;
use std::collections::HashMap;

/// `Value` wrapper with a total `Ord` so it can key a [`RefCountedMultiSet`].
/// Only ever constructed for values that compared (NaN is filtered out
/// before insertion), so the `unwrap_or` fallback is never exercised.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ComparableValue(pub(crate) Value);

impl Eq for ComparableValue {}

impl PartialOrd for ComparableValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ComparableValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

/// Running state for one `$group` output field.
#[derive(Debug)]
pub enum FieldAccumulator {
    /// `$sum`, accumulated in `f64`. `count` tracks contributing rows (not
    /// just ones that parsed as numeric) so `is_empty` reflects group
    /// membership rather than whether any non-zero contribution landed.
    Sum { total: f64, count: u64 },
    /// `$avg`, maintained as `(sum, count)` and finalized as `sum / count`
    /// (`0` when `count == 0`). `rows` tracks contributing rows separately
    /// from `count` (which only counts rows that parsed as numeric), so a
    /// group fed entirely non-numeric values for this field still reports
    /// non-empty while it holds live rows.
    Avg { sum: f64, count: u64, rows: u64 },
    /// `$min`, tracked via a ref-counted multiset so removing the current
    /// minimum promotes the next one in `O(log n)`.
    Min(RefCountedMultiSet<ComparableValue>),
    /// `$max`, symmetric to `$min`.
    Max(RefCountedMultiSet<ComparableValue>),
    /// `$first`: the value contributed by the numerically smallest live
    /// RowId (RowId order approximates arrival order).
    First {
        order: RefCountedMultiSet<RowId>,
        values: HashMap<RowId, Value>,
    },
    /// `$last`: the value contributed by the largest live RowId.
    Last {
        order: RefCountedMultiSet<RowId>,
        values: HashMap<RowId, Value>,
    },
    /// `$count`: number of contributing rows.
    Count(u64),
}

impl FieldAccumulator {
    /// A fresh accumulator of the given kind.
    pub fn new_sum() -> Self {
        FieldAccumulator::Sum { total: 0.0, count: 0 }
    }
    /// A fresh `$avg` accumulator.
    pub fn new_avg() -> Self {
        FieldAccumulator::Avg { sum: 0.0, count: 0, rows: 0 }
    }
    /// A fresh `$min` accumulator.
    pub fn new_min() -> Self {
        FieldAccumulator::Min(RefCountedMultiSet::new())
    }
    /// A fresh `$max` accumulator.
    pub fn new_max() -> Self {
        FieldAccumulator::Max(RefCountedMultiSet::new())
    }
    /// A fresh `$first` accumulator.
    pub fn new_first() -> Self {
        FieldAccumulator::First { order: RefCountedMultiSet::new(), values: HashMap::new() }
    }
    /// A fresh `$last` accumulator.
    pub fn new_last() -> Self {
        FieldAccumulator::Last { order: RefCountedMultiSet::new(), values: HashMap::new() }
    }
    /// A fresh `$count` accumulator.
    pub fn new_count() -> Self {
        FieldAccumulator::Count(0)
    }

    /// Add one row's contribution.
    pub fn add(&mut self, row_id: RowId, value: &Value) {
        match self {
            FieldAccumulator::Sum { total, count } => {
                if let Some(n) = value.as_numeric() {
                    *total += n;
                }
                *count += 1;
            }
            FieldAccumulator::Avg { sum, count, rows } => {
                if let Some(n) = value.as_numeric() {
                    *sum += n;
                    *count += 1;
                }
                *rows += 1;
            }
            FieldAccumulator::Min(set) | FieldAccumulator::Max(set) => {
                if !matches!(value, Value::Double(d) if d.is_nan()) {
                    set.insert(ComparableValue(value.clone()));
                }
            }
            FieldAccumulator::First { order, values } | FieldAccumulator::Last { order, values } => {
                order.insert(row_id);
                values.insert(row_id, value.clone());
            }
            FieldAccumulator::Count(n) => *n += 1,
        }
    }

    /// Undo one row's contribution (decremental `$group` maintenance). The
    /// caller must pass the same `value` that was originally added.
    pub fn remove(&mut self, row_id: RowId, value: &Value) {
        match self {
            FieldAccumulator::Sum { total, count } => {
                if let Some(n) = value.as_numeric() {
                    *total -= n;
                }
                *count = count.saturating_sub(1);
            }
            FieldAccumulator::Avg { sum, count, rows } => {
                if let Some(n) = value.as_numeric() {
                    *sum -= n;
                    *count = count.saturating_sub(1);
                }
                *rows = rows.saturating_sub(1);
            }
            FieldAccumulator::Min(set) | FieldAccumulator::Max(set) => {
                if !matches!(value, Value::Double(d) if d.is_nan()) {
                    set.remove(&ComparableValue(value.clone()));
                }
            }
            FieldAccumulator::First { order, values } | FieldAccumulator::Last { order, values } => {
                order.remove(&row_id);
                values.remove(&row_id);
            }
            FieldAccumulator::Count(n) => *n = n.saturating_sub(1),
        }
    }

    /// `true` if this accumulator currently has no contributing rows (the
    /// group should be torn down once every field reaches this state).
    pub fn is_empty(&self) -> bool {
        match self {
            FieldAccumulator::Sum { count, .. } => *count == 0,
            FieldAccumulator::Avg { rows, .. } => *rows == 0,
            FieldAccumulator::Min(set) | FieldAccumulator::Max(set) => set.is_empty(),
            FieldAccumulator::First { order, .. } | FieldAccumulator::Last { order, .. } => order.is_empty(),
            FieldAccumulator::Count(n) => *n == 0,
        }
    }

    /// The finalized value for this accumulator.
    pub fn finalize(&self) -> Value {
        match self {
            FieldAccumulator::Sum { total, .. } => Value::Double(*total),
            FieldAccumulator::Avg { sum, count, .. } => {
                if *count == 0 {
                    Value::Int(0)
                } else {
                    Value::Double(sum / *count as f64)
                }
            }
            FieldAccumulator::Min(set) => set.min().map(|v| v.0.clone()).unwrap_or(Value::Null),
            FieldAccumulator::Max(set) => set.max().map(|v| v.0.clone()).unwrap_or(Value::Null),
            FieldAccumulator::First { order, values } => {
                order.min().and_then(|id| values.get(id)).cloned().unwrap_or(Value::Null)
            }
            FieldAccumulator::Last { order, values } => {
                order.max().and_then(|id| values.get(id)).cloned().unwrap_or(Value::Null)
            }
            FieldAccumulator::Count(n) => Value::Int(*n as i64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_accumulates_in_f64() {
        let mut acc = FieldAccumulator::new_sum();
        acc.add(RowId::physical(0), &Value::Int(2));
        acc.add(RowId::physical(1), &Value::Double(1.5));
        assert_eq!(acc.finalize(), Value::Double(3.5));
    }

    #[test]
    fn avg_with_zero_contributions_finalizes_to_zero() {
        let acc = FieldAccumulator::new_avg();
        assert_eq!(acc.finalize(), Value::Int(0));
    }

    #[test]
    fn min_max_survive_removal_of_the_extreme() {
        let mut min = FieldAccumulator::new_min();
        min.add(RowId::physical(0), &Value::Int(5));
        min.add(RowId::physical(1), &Value::Int(1));
        min.add(RowId::physical(2), &Value::Int(9));
        assert_eq!(min.finalize(), Value::Int(1));
        min.remove(RowId::physical(1), &Value::Int(1));
        assert_eq!(min.finalize(), Value::Int(5));
    }

    #[test]
    fn nan_is_ignored_by_min_max() {
        let mut max = FieldAccumulator::new_max();
        max.add(RowId::physical(0), &Value::Double(f64::NAN));
        max.add(RowId::physical(1), &Value::Int(3));
        assert_eq!(max.finalize(), Value::Int(3));
    }

    #[test]
    fn first_and_last_track_arrival_order_by_row_id() {
        let mut first = FieldAccumulator::new_first();
        first.add(RowId::physical(5), &Value::String("late".into()));
        first.add(RowId::physical(1), &Value::String("early".into()));
        assert_eq!(first.finalize(), Value::String("early".into()));

        let mut last = FieldAccumulator::new_last();
        last.add(RowId::physical(5), &Value::String("late".into()));
        last.add(RowId::physical(1), &Value::String("early".into()));
        assert_eq!(last.finalize(), Value::String("late".into()));
    }

    #[test]
    fn removing_the_first_row_promotes_the_next_one() {
        let mut first = FieldAccumulator::new_first();
        first.add(RowId::physical(1), &Value::Int(10));
        first.add(RowId::physical(2), &Value::Int(20));
        first.remove(RowId::physical(1), &Value::Int(10));
        assert_eq!(first.finalize(), Value::Int(20));
    }

    #[test]
    fn sum_reports_emptiness_from_its_own_row_count() {
        let mut sum = FieldAccumulator::new_sum();
        sum.add(RowId::physical(0), &Value::Int(10));
        sum.add(RowId::physical(1), &Value::Int(5));
        assert!(!sum.is_empty());
        sum.remove(RowId::physical(0), &Value::Int(10));
        assert!(!sum.is_empty(), "one remaining contributing row keeps the group alive");
        assert_eq!(sum.finalize(), Value::Double(5.0));
        sum.remove(RowId::physical(1), &Value::Int(5));
        assert!(sum.is_empty());
    }

    #[test]
    fn count_tracks_emptiness_for_group_teardown() {
        let mut count = FieldAccumulator::new_count();
        assert!(count.is_empty());
        count.add(RowId::physical(0), &Value::Null);
        assert!(!count.is_empty());
        count.remove(RowId::physical(0), &Value::Null);
        assert!(count.is_empty());
    }
}
