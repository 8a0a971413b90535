//! Base document storage (specification §4.2, §4.6).
//!
//! Operators work over columnar batches, but several stages need the raw
//! document: `$unwind` reads an array field no column stores, `$lookup`
//! attaches a foreign document, and late materialization clones a row's
//! base document before applying its overlay. [`DocumentStore`] is the
//! RowId-indexed map everything else is built on top of.

use aggvm_core::{Document, RowId};
use aggvm_storage::RowIdSpace;
use rustc_hash::FxHashMap;

/// Owns the row-id space and the physical documents it addresses.
#[derive(Debug, Default)]
pub struct DocumentStore {
    row_space: RowIdSpace,
    docs: FxHashMap<RowId, Document>,
}

impl DocumentStore {
    /// An empty store.
    pub fn new() -> Self {
        DocumentStore::default()
    }

    /// Allocate a RowId and store `doc` under it.
    pub fn ingest(&mut self, doc: Document) -> RowId {
        let row_id = self.row_space.allocate();
        self.docs.insert(row_id, doc);
        row_id
    }

    /// Store `doc` under an already-allocated `row_id`, bypassing the
    /// row-id space. Used to build a scratch store mirroring another
    /// store's ids (e.g. the per-execution snapshot `$unwind` reads base
    /// documents from on the columnar path), never for ids this store
    /// itself allocates.
    pub fn ingest_at(&mut self, row_id: RowId, doc: Document) {
        self.docs.insert(row_id, doc);
    }

    /// Remove a physical row, freeing its id for reuse. Returns `true` if it
    /// was present.
    pub fn remove(&mut self, row_id: RowId) -> bool {
        if self.docs.remove(&row_id).is_some() {
            self.row_space.free(row_id);
            true
        } else {
            false
        }
    }

    /// Resolve a row id (physical or virtual) to its document. Virtual ids
    /// materialize lazily from their origin via the row-id space.
    pub fn get(&self, row_id: RowId) -> Option<Document> {
        if row_id.is_virtual() {
            let info = self.row_space.virtual_info(row_id)?;
            let base = self.docs.get(&info.origin)?;
            self.row_space.materialize(row_id, base)
        } else {
            self.docs.get(&row_id).cloned()
        }
    }

    /// Mint a virtual row id denoting one element of an unwound array.
    pub fn mint_virtual(&mut self, origin: RowId, array_index: u32, field: &str) -> RowId {
        self.row_space.mint_virtual(origin, array_index, field)
    }

    /// Iterate all live physical rows in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (RowId, &Document)> {
        self.docs.iter().map(|(id, doc)| (*id, doc))
    }

    /// Number of live physical documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// `true` if the store holds no documents.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggvm_core::Value;

    #[test]
    fn ingest_and_get_roundtrip() {
        let mut store = DocumentStore::new();
        let mut doc = Document::new();
        doc.insert("a", Value::Int(1));
        let id = store.ingest(doc.clone());
        assert_eq!(store.get(id), Some(doc));
    }

    #[test]
    fn remove_frees_the_row_for_reuse() {
        let mut store = DocumentStore::new();
        let mut doc = Document::new();
        doc.insert("a", Value::Int(1));
        let id = store.ingest(doc.clone());
        assert!(store.remove(id));
        assert_eq!(store.get(id), None);
        let id2 = store.ingest(doc);
        assert_eq!(id, id2);
    }

    #[test]
    fn virtual_rows_materialize_from_their_origin() {
        let mut store = DocumentStore::new();
        let mut doc = Document::new();
        doc.insert("tags", Value::Array(smallvec::smallvec![Value::String("a".into()), Value::String("b".into())]));
        let origin = store.ingest(doc);
        let virt = store.mint_virtual(origin, 1, "tags");
        let materialized = store.get(virt).unwrap();
        assert_eq!(materialized.get("tags"), Some(&Value::String("b".into())));
    }
}
