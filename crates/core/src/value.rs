//! The document value model (specification §3).
//!
//! A [`Value`] is the tagged union every column kind, predicate, and
//! accumulator ultimately operates on. A [`Document`] is an ordered mapping
//! from string keys to values: insertion order is preserved for output
//! stability, but equality ignores key order (it compares as a map).

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Inline capacity for small array/document values before spilling to the
/// heap. Most aggregation documents carry a handful of fields or array
/// elements, so this avoids an allocation in the common case.
const INLINE_LEN: usize = 4;

/// A document value: null, boolean, integer, double, string, sequence,
/// nested document, or timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value. Distinct from a missing field.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered sequence of values. Order is part of equality.
    Array(SmallVec<[Value; INLINE_LEN]>),
    /// Nested document. Order is not part of equality.
    Document(Document),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
}

impl Value {
    /// The total-order rank used for `$min`/`$max` across mixed types:
    /// `null < bool < number < string < array < document`.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Double(_) | Value::Timestamp(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Document(_) => 5,
        }
    }

    /// Numeric view for cross-kind comparisons (`Int`/`Double`/`Timestamp`
    /// all compare as numbers). Returns `None` for non-numeric values or for
    /// NaN, which the spec treats as incomparable.
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) if !d.is_nan() => Some(*d),
            Value::Timestamp(t) => Some(*t as f64),
            _ => None,
        }
    }

    /// Total order comparison used by `$min`/`$max` and by `$sort` key
    /// columns. Returns `None` when either side is a NaN double, which the
    /// spec defines as incomparable (such rows are ignored by accumulators).
    pub fn total_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.total_cmp(y) {
                        Some(Ordering::Equal) => continue,
                        other => return other,
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            (Value::Document(a), Value::Document(b)) => a.total_cmp(b),
            _ if self.type_rank() == other.type_rank() && self.type_rank() == 2 => {
                let a = self.as_f64()?;
                let b = other.as_f64()?;
                a.partial_cmp(&b)
            }
            _ => Some(self.type_rank().cmp(&other.type_rank())),
        }
    }

    /// `true` if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `true` if this value is an empty array.
    pub fn is_empty_array(&self) -> bool {
        matches!(self, Value::Array(a) if a.is_empty())
    }

    /// View this value as a sequence of elements for `$unwind`, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a.as_slice()),
            _ => None,
        }
    }

    /// Numeric value as `f64`, used by `$sum`/`$avg` kernels. Non-numeric or
    /// null values contribute nothing (treated as absent, not zero) per the
    /// spec's `countValid`-style semantics.
    pub fn as_numeric(&self) -> Option<f64> {
        self.as_f64()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Int(a), Value::Double(b)) | (Value::Double(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Document(a), Value::Document(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

/// An ordered mapping from string keys to [`Value`]s.
///
/// Insertion order is preserved so output documents are stable, but
/// [`PartialEq`] compares as a map: two documents with the same keys and
/// values in different orders are equal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    entries: SmallVec<[(String, Value); INLINE_LEN]>,
}

impl Document {
    /// An empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace a field, preserving the position of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Look up a field by exact key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Remove a field, returning its value if present.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Iterate fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Look up a dotted field path (e.g. `"a.b.c"`), descending through
    /// nested documents. Returns `None` if any segment is missing or the
    /// path traverses a non-document value.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.get(first)?;
        for segment in segments {
            match current {
                Value::Document(doc) => current = doc.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Set a dotted field path, creating intermediate documents as needed.
    pub fn set_path(&mut self, path: &str, value: Value) {
        let mut segments = path.split('.');
        let first = segments.next().unwrap_or(path);
        let rest: Vec<&str> = segments.collect();
        if rest.is_empty() {
            self.insert(first, value);
            return;
        }
        let nested = match self
            .entries
            .iter_mut()
            .find(|(k, _)| k == first)
            .map(|(_, v)| v)
        {
            Some(existing @ Value::Document(_)) => existing,
            Some(slot) => {
                *slot = Value::Document(Document::new());
                slot
            }
            None => {
                self.entries.push((first.to_string(), Value::Document(Document::new())));
                &mut self.entries.last_mut().unwrap().1
            }
        };
        if let Value::Document(doc) = nested {
            doc.set_path(&rest.join("."), value);
        }
    }

    /// Total-order comparison, delegating field-by-field after sorting keys
    /// so that field order does not affect the result.
    fn total_cmp(&self, other: &Document) -> Option<Ordering> {
        let mut a: Vec<_> = self.entries.iter().collect();
        let mut b: Vec<_> = other.entries.iter().collect();
        a.sort_by(|x, y| x.0.cmp(&y.0));
        b.sort_by(|x, y| x.0.cmp(&y.0));
        match a.len().cmp(&b.len()) {
            Ordering::Equal => {}
            other => return Some(other),
        }
        for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
            match ka.cmp(kb) {
                Ordering::Equal => {}
                other => return Some(other),
            }
            match va.total_cmp(vb) {
                Some(Ordering::Equal) => continue,
                other => return other,
            }
        }
        Some(Ordering::Equal)
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        self.entries
            .iter()
            .all(|(k, v)| other.get(k).is_some_and(|ov| ov == v))
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

/// Stable hash of a value for use as a group-by or dimension key. Two values
/// that are `==` under [`PartialEq`] hash identically (in particular
/// `Int(1) == Double(1.0)` hash to the same bucket).
pub fn hash_value(value: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    hash_value_into(value, &mut hasher);
    hasher.finish()
}

fn hash_value_into<H: Hasher>(value: &Value, hasher: &mut H) {
    match value {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Int(i) => {
            2u8.hash(hasher);
            (*i as f64).to_bits().hash(hasher);
        }
        Value::Double(d) => {
            2u8.hash(hasher);
            d.to_bits().hash(hasher);
        }
        Value::Timestamp(t) => {
            2u8.hash(hasher);
            (*t as f64).to_bits().hash(hasher);
        }
        Value::String(s) => {
            3u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Array(items) => {
            4u8.hash(hasher);
            items.len().hash(hasher);
            for item in items {
                hash_value_into(item, hasher);
            }
        }
        Value::Document(doc) => {
            5u8.hash(hasher);
            let mut fields: Vec<_> = doc.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            fields.len().hash(hasher);
            for (k, v) in fields {
                k.hash(hasher);
                hash_value_into(v, hasher);
            }
        }
    }
}
