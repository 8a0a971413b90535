//! Late materialization (specification §4.6).
//!
//! The columnar path rewrites only the columns an operator actually reads or
//! writes; it never eagerly clones whole documents. [`Overlay`] records,
//! per row, the fields a stage changed (via the `on_transform` sink each
//! operator can be given), and [`MaterializeCache`] memoizes the final
//! materialized document for a given `(projection fingerprint, row)` pair so
//! that repeatedly reading the same row under the same pipeline shape is
//! `O(1)` instead of replaying every transform.

use aggvm_core::{Document, RowId, Value};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// Per-row field overrides recorded by operators as they transform rows,
/// rather than cloning the base document at every stage.
#[derive(Debug, Default)]
pub struct Overlay {
    fields: FxHashMap<RowId, Vec<(String, Value)>>,
}

impl Overlay {
    /// An empty overlay.
    pub fn new() -> Self {
        Overlay::default()
    }

    /// Record that `row_id`'s `field` was rewritten to `value`.
    pub fn record(&mut self, row_id: RowId, field: &str, value: Value) {
        let entries = self.fields.entry(row_id).or_default();
        if let Some(slot) = entries.iter_mut().find(|(f, _)| f == field) {
            slot.1 = value;
        } else {
            entries.push((field.to_string(), value));
        }
    }

    /// Apply every recorded override for `row_id` onto a clone of `base`.
    pub fn apply(&self, row_id: RowId, base: &Document) -> Document {
        let mut doc = base.clone();
        if let Some(entries) = self.fields.get(&row_id) {
            for (field, value) in entries {
                doc.set_path(field, value.clone());
            }
        }
        doc
    }

    /// Drop every override recorded for `row_id` (it left the live set).
    pub fn forget(&mut self, row_id: RowId) {
        self.fields.remove(&row_id);
    }

    /// Number of rows with at least one recorded override.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// `true` if no row has a recorded override.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A fixed-capacity LRU cache of materialized documents, keyed by a
/// projection fingerprint (identifying which pipeline shape produced the
/// overlay) plus the row id.
pub struct MaterializeCache {
    capacity: usize,
    entries: FxHashMap<(u64, RowId), Document>,
    order: VecDeque<(u64, RowId)>,
}

impl MaterializeCache {
    /// A cache holding at most `capacity` materialized documents.
    pub fn new(capacity: usize) -> Self {
        MaterializeCache { capacity: capacity.max(1), entries: FxHashMap::default(), order: VecDeque::new() }
    }

    /// Look up a cached document, promoting it to most-recently-used.
    pub fn get(&mut self, fingerprint: u64, row_id: RowId) -> Option<&Document> {
        let key = (fingerprint, row_id);
        if self.entries.contains_key(&key) {
            self.touch(key);
            self.entries.get(&key)
        } else {
            None
        }
    }

    /// Insert (or refresh) a materialized document, evicting the
    /// least-recently-used entry if the cache is at capacity.
    pub fn put(&mut self, fingerprint: u64, row_id: RowId, doc: Document) {
        let key = (fingerprint, row_id);
        if self.entries.insert(key, doc).is_some() {
            self.touch(key);
            return;
        }
        self.order.push_back(key);
        if self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    /// Drop every cached entry for `row_id`, across all fingerprints.
    pub fn invalidate_row(&mut self, row_id: RowId) {
        self.entries.retain(|(_, r), _| *r != row_id);
        self.order.retain(|(_, r)| *r != row_id);
    }

    fn touch(&mut self, key: (u64, RowId)) {
        if let Some(pos) = self.order.iter().position(|k| *k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key);
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_applies_recorded_overrides_onto_a_clone() {
        let mut overlay = Overlay::new();
        let base: Document = [("a".to_string(), Value::Int(1))].into_iter().collect();
        overlay.record(RowId::physical(0), "a", Value::Int(99));
        let materialized = overlay.apply(RowId::physical(0), &base);
        assert_eq!(materialized.get("a"), Some(&Value::Int(99)));
        assert_eq!(base.get("a"), Some(&Value::Int(1)));
    }

    #[test]
    fn forget_clears_a_rows_overrides() {
        let mut overlay = Overlay::new();
        overlay.record(RowId::physical(0), "a", Value::Int(1));
        overlay.forget(RowId::physical(0));
        assert!(overlay.is_empty());
    }

    #[test]
    fn cache_evicts_least_recently_used_entry() {
        let mut cache = MaterializeCache::new(2);
        cache.put(1, RowId::physical(0), Document::new());
        cache.put(1, RowId::physical(1), Document::new());
        cache.get(1, RowId::physical(0));
        cache.put(1, RowId::physical(2), Document::new());
        assert!(cache.get(1, RowId::physical(1)).is_none());
        assert!(cache.get(1, RowId::physical(0)).is_some());
        assert!(cache.get(1, RowId::physical(2)).is_some());
    }

    #[test]
    fn invalidate_row_drops_entries_across_fingerprints() {
        let mut cache = MaterializeCache::new(4);
        cache.put(1, RowId::physical(0), Document::new());
        cache.put(2, RowId::physical(0), Document::new());
        cache.invalidate_row(RowId::physical(0));
        assert_eq!(cache.len(), 0);
    }
}
