//! Typed column vectors (specification §4.1, "Column vectors & batch").
//!
//! Each variant is plain Structure-of-Arrays storage plus a validity bitmap.
//! Growth is double-on-write and vectors never shrink during a pipeline run;
//! `clear()` resets validity (and, for `Utf8`, the selection length) without
//! releasing backing storage, so a batch returned to the free pool can be
//! reused without reallocating.

use crate::dict::StringPool;
use crate::validity::{BitSet, ValidityBitmap};
use aggvm_core::{Error, Result, Value};

/// The element kind of a column vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 64-bit floating point.
    F64,
    /// 128-bit signed integer ("big").
    I128,
    /// Bit-packed boolean.
    Bool,
    /// Dictionary-encoded UTF-8 string.
    Utf8,
}

/// A single typed column of a [`crate::batch::ColumnarBatch`].
#[derive(Debug, Clone)]
pub enum ColumnVector {
    /// `i32` storage.
    I32 { data: Vec<i32>, validity: ValidityBitmap },
    /// `i64` storage.
    I64 { data: Vec<i64>, validity: ValidityBitmap },
    /// `f64` storage.
    F64 { data: Vec<f64>, validity: ValidityBitmap },
    /// `i128` ("big") storage.
    I128 { data: Vec<i128>, validity: ValidityBitmap },
    /// Bit-packed boolean storage.
    Bool { data: BitSet, validity: ValidityBitmap },
    /// Dictionary-encoded UTF-8 storage: `ids[i]` indexes into `pool`.
    Utf8 {
        ids: Vec<u32>,
        pool: StringPool,
        validity: ValidityBitmap,
    },
}

impl ColumnVector {
    /// Allocate a column of the given kind and initial length, all slots
    /// invalid.
    pub fn new(kind: ColumnKind, len: usize) -> Self {
        match kind {
            ColumnKind::I32 => ColumnVector::I32 {
                data: vec![0; len],
                validity: ValidityBitmap::new(len),
            },
            ColumnKind::I64 => ColumnVector::I64 {
                data: vec![0; len],
                validity: ValidityBitmap::new(len),
            },
            ColumnKind::F64 => ColumnVector::F64 {
                data: vec![0.0; len],
                validity: ValidityBitmap::new(len),
            },
            ColumnKind::I128 => ColumnVector::I128 {
                data: vec![0; len],
                validity: ValidityBitmap::new(len),
            },
            ColumnKind::Bool => ColumnVector::Bool {
                data: BitSet::new(len),
                validity: ValidityBitmap::new(len),
            },
            ColumnKind::Utf8 => ColumnVector::Utf8 {
                ids: vec![0; len],
                pool: StringPool::new(),
                validity: ValidityBitmap::new(len),
            },
        }
    }

    /// This column's kind.
    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnVector::I32 { .. } => ColumnKind::I32,
            ColumnVector::I64 { .. } => ColumnKind::I64,
            ColumnVector::F64 { .. } => ColumnKind::F64,
            ColumnVector::I128 { .. } => ColumnKind::I128,
            ColumnVector::Bool { .. } => ColumnKind::Bool,
            ColumnVector::Utf8 { .. } => ColumnKind::Utf8,
        }
    }

    /// Number of slots (not all necessarily valid or selected).
    pub fn len(&self) -> usize {
        match self {
            ColumnVector::I32 { data, .. } => data.len(),
            ColumnVector::I64 { data, .. } => data.len(),
            ColumnVector::F64 { data, .. } => data.len(),
            ColumnVector::I128 { data, .. } => data.len(),
            ColumnVector::Bool { validity, .. } => validity.len(),
            ColumnVector::Utf8 { ids, .. } => ids.len(),
        }
    }

    /// `true` if there are no slots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` if slot `i` holds a present (non-null) value.
    pub fn is_valid(&self, i: usize) -> bool {
        match self {
            ColumnVector::I32 { validity, .. }
            | ColumnVector::I64 { validity, .. }
            | ColumnVector::F64 { validity, .. }
            | ColumnVector::I128 { validity, .. }
            | ColumnVector::Bool { validity, .. }
            | ColumnVector::Utf8 { validity, .. } => validity.get(i),
        }
    }

    /// Read slot `i` as a [`Value`], or `None` if invalid (null).
    pub fn get(&self, i: usize) -> Option<Value> {
        if !self.is_valid(i) {
            return None;
        }
        Some(match self {
            ColumnVector::I32 { data, .. } => Value::Int(data[i] as i64),
            ColumnVector::I64 { data, .. } => Value::Int(data[i]),
            ColumnVector::F64 { data, .. } => Value::Double(data[i]),
            ColumnVector::I128 { data, .. } => Value::Double(data[i] as f64),
            ColumnVector::Bool { data, .. } => Value::Bool(data.get(i)),
            ColumnVector::Utf8 { ids, pool, .. } => Value::String(pool.resolve(ids[i]).to_string()),
        })
    }

    /// Write `value` into slot `i`. `None` clears the validity bit and
    /// leaves the underlying storage untouched, per the `set(i, null)`
    /// contract in §4.1.
    pub fn set(&mut self, i: usize, value: Option<&Value>) -> Result<()> {
        let Some(value) = value else {
            self.set_invalid(i);
            return Ok(());
        };
        match (self, value) {
            (ColumnVector::I32 { data, validity }, Value::Int(v)) => {
                data[i] = *v as i32;
                validity.set(i, true);
            }
            (ColumnVector::I64 { data, validity }, Value::Int(v)) => {
                data[i] = *v;
                validity.set(i, true);
            }
            (ColumnVector::F64 { data, validity }, Value::Double(v)) => {
                data[i] = *v;
                validity.set(i, true);
            }
            (ColumnVector::F64 { data, validity }, Value::Int(v)) => {
                data[i] = *v as f64;
                validity.set(i, true);
            }
            (ColumnVector::I128 { data, validity }, Value::Int(v)) => {
                data[i] = *v as i128;
                validity.set(i, true);
            }
            (ColumnVector::Bool { data, validity }, Value::Bool(v)) => {
                data.set(i, *v);
                validity.set(i, true);
            }
            (ColumnVector::Utf8 { ids, pool, validity }, Value::String(s)) => {
                ids[i] = pool.intern(s);
                validity.set(i, true);
            }
            (col, other) => {
                return Err(Error::internal(
                    "I2",
                    format!("value kind {other:?} does not match column kind {:?}", col.kind()),
                ))
            }
        }
        Ok(())
    }

    fn set_invalid(&mut self, i: usize) {
        match self {
            ColumnVector::I32 { validity, .. }
            | ColumnVector::I64 { validity, .. }
            | ColumnVector::F64 { validity, .. }
            | ColumnVector::I128 { validity, .. }
            | ColumnVector::Bool { validity, .. }
            | ColumnVector::Utf8 { validity, .. } => validity.set(i, false),
        }
    }

    /// Grow to `new_len` slots (double-on-write policy is the caller's
    /// responsibility; this just performs the resize), failing with
    /// [`Error::CapacityExceeded`] if `new_len` exceeds `max_capacity`.
    pub fn resize(&mut self, new_len: usize, max_capacity: usize) -> Result<()> {
        if new_len > max_capacity {
            return Err(Error::CapacityExceeded(format!(
                "column resize to {new_len} exceeds configured maximum {max_capacity}"
            )));
        }
        if new_len <= self.len() {
            return Ok(());
        }
        match self {
            ColumnVector::I32 { data, validity } => {
                data.resize(new_len, 0);
                validity.resize(new_len);
            }
            ColumnVector::I64 { data, validity } => {
                data.resize(new_len, 0);
                validity.resize(new_len);
            }
            ColumnVector::F64 { data, validity } => {
                data.resize(new_len, 0.0);
                validity.resize(new_len);
            }
            ColumnVector::I128 { data, validity } => {
                data.resize(new_len, 0);
                validity.resize(new_len);
            }
            ColumnVector::Bool { data, validity } => {
                data.resize(new_len);
                validity.resize(new_len);
            }
            ColumnVector::Utf8 { ids, validity, .. } => {
                ids.resize(new_len, 0);
                validity.resize(new_len);
            }
        }
        Ok(())
    }

    /// Reset validity to all-invalid without shrinking capacity
    /// (clear-on-reuse). The string pool of a `Utf8` column is also reset,
    /// since a returned-to-pool batch starts a fresh interning scope.
    pub fn clear(&mut self) {
        match self {
            ColumnVector::I32 { validity, .. }
            | ColumnVector::I64 { validity, .. }
            | ColumnVector::F64 { validity, .. }
            | ColumnVector::I128 { validity, .. }
            | ColumnVector::Bool { validity, .. } => validity.clear(),
            ColumnVector::Utf8 { validity, pool, .. } => {
                validity.clear();
                *pool = StringPool::new();
            }
        }
    }

    /// Dictionary ids for a `Utf8` column, for operators that can compare by
    /// id rather than resolving strings.
    pub fn dict_ids(&self) -> Option<&[u32]> {
        match self {
            ColumnVector::Utf8 { ids, .. } => Some(ids),
            _ => None,
        }
    }

    /// The string pool backing a `Utf8` column.
    pub fn pool(&self) -> Option<&StringPool> {
        match self {
            ColumnVector::Utf8 { pool, .. } => Some(pool),
            _ => None,
        }
    }

    /// Mutable access to the string pool, for compiling `$in` literal sets
    /// into dict ids without touching column data.
    pub fn pool_mut(&mut self) -> Option<&mut StringPool> {
        match self {
            ColumnVector::Utf8 { pool, .. } => Some(pool),
            _ => None,
        }
    }

    /// Sum of valid numeric slots over the given row indices, per the
    /// `$sum` columnar kernel (accumulates in `f64`).
    pub fn sum(&self, rows: impl Iterator<Item = u32>) -> f64 {
        rows.filter_map(|i| self.get(i as usize))
            .filter_map(|v| v.as_numeric())
            .sum()
    }

    /// `(sum, count)` of valid numeric slots over the given row indices, the
    /// basis for `$avg`.
    pub fn sum_count(&self, rows: impl Iterator<Item = u32>) -> (f64, usize) {
        let mut sum = 0.0;
        let mut count = 0usize;
        for i in rows {
            if let Some(v) = self.get(i as usize).and_then(|v| v.as_numeric()) {
                sum += v;
                count += 1;
            }
        }
        (sum, count)
    }

    /// Count of valid (non-null) slots over the given row indices.
    pub fn count_valid(&self, rows: impl Iterator<Item = u32>) -> usize {
        rows.filter(|&i| self.is_valid(i as usize)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_column_is_all_invalid() {
        let col = ColumnVector::new(ColumnKind::I64, 4);
        for i in 0..4 {
            assert!(col.get(i).is_none());
        }
    }

    #[test]
    fn set_null_clears_without_touching_storage() {
        let mut col = ColumnVector::new(ColumnKind::I64, 2);
        col.set(0, Some(&Value::Int(42))).unwrap();
        col.set(0, None).unwrap();
        assert_eq!(col.get(0), None);
        // underlying storage still holds 42, just marked invalid
        if let ColumnVector::I64 { data, .. } = &col {
            assert_eq!(data[0], 42);
        }
    }

    #[test]
    fn utf8_column_dictionary_encodes() {
        let mut col = ColumnVector::new(ColumnKind::Utf8, 3);
        col.set(0, Some(&Value::String("a".into()))).unwrap();
        col.set(1, Some(&Value::String("b".into()))).unwrap();
        col.set(2, Some(&Value::String("a".into()))).unwrap();
        assert_eq!(col.dict_ids().unwrap()[0], col.dict_ids().unwrap()[2]);
        assert_eq!(col.get(1), Some(Value::String("b".into())));
    }

    #[test]
    fn resize_doubles_and_preserves_values() {
        let mut col = ColumnVector::new(ColumnKind::I32, 2);
        col.set(0, Some(&Value::Int(7))).unwrap();
        col.resize(4, 1024).unwrap();
        assert_eq!(col.len(), 4);
        assert_eq!(col.get(0), Some(Value::Int(7)));
        assert_eq!(col.get(3), None);
    }

    #[test]
    fn resize_past_max_capacity_errors() {
        let mut col = ColumnVector::new(ColumnKind::I32, 2);
        let err = col.resize(100, 10).unwrap_err();
        assert_eq!(err.code(), "CapacityExceeded");
    }

    #[test]
    fn clear_resets_validity_and_string_pool() {
        let mut col = ColumnVector::new(ColumnKind::Utf8, 2);
        col.set(0, Some(&Value::String("x".into()))).unwrap();
        col.clear();
        assert!(col.get(0).is_none());
        assert_eq!(col.pool().unwrap().len(), 0);
    }

    #[test]
    fn kind_mismatch_is_internal_error() {
        let mut col = ColumnVector::new(ColumnKind::I32, 1);
        let err = col.set(0, Some(&Value::String("x".into()))).unwrap_err();
        assert_eq!(err.code(), "Internal");
    }

    #[test]
    fn sum_and_count_valid_skip_nulls() {
        let mut col = ColumnVector::new(ColumnKind::F64, 3);
        col.set(0, Some(&Value::Double(1.0))).unwrap();
        col.set(2, Some(&Value::Double(3.0))).unwrap();
        assert_eq!(col.sum(0..3), 4.0);
        assert_eq!(col.count_valid(0..3), 2);
        assert_eq!(col.sum_count(0..3), (4.0, 2));
    }
}
