//! Live set and IVM-backed document store (specification §3, §4.7).

use crate::ivm::dimension::Dimension;
use aggvm_core::{Delta, Document, RowId};
use rustc_hash::FxHashMap;

/// A compact bitset over physical RowIds, plus a running count of set bits.
/// Virtual ids are never tracked here — they exist only within an unwound
/// scope and are owned by [`aggvm_storage::RowIdSpace`] instead.
#[derive(Debug, Default)]
pub struct LiveSet {
    words: Vec<u64>,
    count: usize,
}

const BITS: usize = 64;

impl LiveSet {
    /// An empty live set.
    pub fn new() -> Self {
        LiveSet::default()
    }

    fn ensure_capacity(&mut self, ordinal: usize) {
        let word = ordinal / BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
    }

    /// Mark `row_id` live. Returns `true` if it was not already live.
    pub fn set(&mut self, row_id: RowId) -> bool {
        assert!(!row_id.is_virtual(), "LiveSet only tracks physical rows");
        let ordinal = row_id.ordinal() as usize;
        self.ensure_capacity(ordinal);
        let word = ordinal / BITS;
        let bit = 1u64 << (ordinal % BITS);
        let was_set = self.words[word] & bit != 0;
        self.words[word] |= bit;
        if !was_set {
            self.count += 1;
        }
        !was_set
    }

    /// Clear `row_id`'s live bit. Returns `true` if it had been live.
    pub fn clear(&mut self, row_id: RowId) -> bool {
        assert!(!row_id.is_virtual(), "LiveSet only tracks physical rows");
        let ordinal = row_id.ordinal() as usize;
        let word = ordinal / BITS;
        if word >= self.words.len() {
            return false;
        }
        let bit = 1u64 << (ordinal % BITS);
        let was_set = self.words[word] & bit != 0;
        self.words[word] &= !bit;
        if was_set {
            self.count -= 1;
        }
        was_set
    }

    /// `true` if `row_id` is currently live.
    pub fn contains(&self, row_id: RowId) -> bool {
        let ordinal = row_id.ordinal() as usize;
        let word = ordinal / BITS;
        word < self.words.len() && self.words[word] & (1u64 << (ordinal % BITS)) != 0
    }

    /// Number of live rows.
    pub fn count(&self) -> usize {
        self.count
    }

    /// `true` if no row is live.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterate all live ordinals in ascending order, as physical RowIds.
    pub fn iter(&self) -> impl Iterator<Item = RowId> + '_ {
        self.words.iter().enumerate().flat_map(|(word_idx, &word)| {
            (0..BITS).filter_map(move |bit| {
                if word & (1u64 << bit) != 0 {
                    Some(RowId::physical((word_idx * BITS + bit) as u32))
                } else {
                    None
                }
            })
        })
    }
}

/// The IVM-backed document store: documents addressed by RowId, a live-set
/// bitset, and named dimensions indexing field paths an operator has asked
/// to track. `apply_insert`/`apply_remove` are the only places that keep
/// all three consistent with each other.
#[derive(Debug, Default)]
pub struct IvmStore {
    documents: FxHashMap<RowId, Document>,
    live: LiveSet,
    dimensions: FxHashMap<String, Dimension>,
}

impl IvmStore {
    /// An empty store.
    pub fn new() -> Self {
        IvmStore::default()
    }

    /// Insert `doc` under `row_id`, marking it live and indexing it in
    /// every registered dimension. Returns the resulting `+1` delta.
    pub fn apply_insert(&mut self, row_id: RowId, doc: Document) -> Delta {
        for (field, dim) in self.dimensions.iter_mut() {
            if let Some(value) = doc.get_path(field) {
                dim.insert(row_id, value.clone());
            }
        }
        self.documents.insert(row_id, doc);
        self.live.set(row_id);
        Delta::insert(row_id)
    }

    /// Remove `row_id`, clearing its live bit and every dimension entry.
    /// Returns the resulting `-1` delta, or `None` if the row was not live.
    pub fn apply_remove(&mut self, row_id: RowId) -> Option<Delta> {
        if !self.live.clear(row_id) {
            return None;
        }
        self.documents.remove(&row_id);
        for dim in self.dimensions.values_mut() {
            dim.remove(row_id);
        }
        Some(Delta::remove(row_id))
    }

    /// The document currently stored for `row_id`.
    pub fn document(&self, row_id: RowId) -> Option<&Document> {
        self.documents.get(&row_id)
    }

    /// `true` if `row_id` is live.
    pub fn is_live(&self, row_id: RowId) -> bool {
        self.live.contains(row_id)
    }

    /// Number of live rows.
    pub fn len(&self) -> usize {
        self.live.count()
    }

    /// `true` if the store holds no live rows.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Register (or fetch) a dimension over `field`, backfilling it from
    /// every currently-live document.
    pub fn dimension(&mut self, field: &str) -> &Dimension {
        if !self.dimensions.contains_key(field) {
            let mut dim = Dimension::new();
            for (row_id, doc) in &self.documents {
                if let Some(value) = doc.get_path(field) {
                    dim.insert(*row_id, value.clone());
                }
            }
            self.dimensions.insert(field.to_string(), dim);
        }
        &self.dimensions[field]
    }
}
