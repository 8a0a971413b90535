//! Row-id space and virtual rows (specification §4.2).
//!
//! Physical ids come from a monotonically increasing counter with a
//! free-list for reuse. Virtual ids are minted by `$unwind` and are never
//! reused: each carries, in a side table, the physical row it came from,
//! the element index within the unwound array, and the field path that was
//! unwound.

use aggvm_core::{Document, RowId, Value};
use rustc_hash::FxHashMap;

/// The facts recorded for a virtual row id: which physical row it came from,
/// which array element it denotes, and which field was unwound.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualRowInfo {
    /// The physical row this virtual row was minted from.
    pub origin: RowId,
    /// Index of the element within the unwound array.
    pub array_index: u32,
    /// Dotted field path that was unwound.
    pub field: String,
}

/// Allocator for physical row ids, plus the side tables that resolve
/// virtual row ids back to their origin.
#[derive(Debug, Default)]
pub struct RowIdSpace {
    next_physical: u32,
    free_list: Vec<u32>,
    next_virtual: u32,
    virtual_info: FxHashMap<u32, VirtualRowInfo>,
}

impl RowIdSpace {
    /// A fresh, empty row-id space.
    pub fn new() -> Self {
        RowIdSpace::default()
    }

    /// Allocate a physical row id: reuses a freed ordinal if one is
    /// available, otherwise advances the monotonic counter.
    pub fn allocate(&mut self) -> RowId {
        let ordinal = self.free_list.pop().unwrap_or_else(|| {
            let id = self.next_physical;
            self.next_physical += 1;
            id
        });
        RowId::physical(ordinal)
    }

    /// Return a physical row id to the free list. A no-op for virtual ids,
    /// which are never reused (per §4.2).
    pub fn free(&mut self, id: RowId) {
        if id.is_virtual() {
            return;
        }
        self.free_list.push(id.ordinal());
    }

    /// Mint a fresh virtual row id denoting element `array_index` of `field`
    /// on physical row `origin`. Virtual ids are never reused across
    /// pipeline runs, so this always advances the virtual counter.
    pub fn mint_virtual(&mut self, origin: RowId, array_index: u32, field: &str) -> RowId {
        let ordinal = self.next_virtual;
        self.next_virtual += 1;
        let id = RowId::virtual_id(ordinal);
        self.virtual_info.insert(
            ordinal,
            VirtualRowInfo {
                origin,
                array_index,
                field: field.to_string(),
            },
        );
        id
    }

    /// Look up the origin facts for a virtual row id.
    pub fn virtual_info(&self, id: RowId) -> Option<&VirtualRowInfo> {
        if !id.is_virtual() {
            return None;
        }
        self.virtual_info.get(&id.ordinal())
    }

    /// Drop the side-table entry for a virtual row id (it is never reused,
    /// but its bookkeeping can be released once no operator references it).
    pub fn forget_virtual(&mut self, id: RowId) {
        if id.is_virtual() {
            self.virtual_info.remove(&id.ordinal());
        }
    }

    /// Number of physical ids currently on the free list.
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// Materialize a virtual row into an owned [`Document`]: clones `base`
    /// (the origin's document) and replaces the unwound field with its
    /// single resolved array element. Ownership — and the clone — is only
    /// paid for when a consumer actually calls this; planning code can
    /// instead inspect [`RowIdSpace::virtual_info`] without touching `base`.
    pub fn materialize(&self, id: RowId, base: &Document) -> Option<Document> {
        let info = self.virtual_info(id)?;
        let array = base.get_path(&info.field)?.as_array()?;
        let element = array.get(info.array_index as usize)?.clone();
        let mut doc = base.clone();
        doc.set_path(&info.field, element);
        Some(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_advances_monotonic_counter() {
        let mut space = RowIdSpace::new();
        let a = space.allocate();
        let b = space.allocate();
        assert_ne!(a, b);
        assert!(!a.is_virtual());
        assert!(!b.is_virtual());
    }

    #[test]
    fn freed_physical_ids_are_reused() {
        let mut space = RowIdSpace::new();
        let a = space.allocate();
        space.free(a);
        let b = space.allocate();
        assert_eq!(a, b);
    }

    #[test]
    fn freeing_a_virtual_id_is_a_noop() {
        let mut space = RowIdSpace::new();
        let origin = space.allocate();
        let v = space.mint_virtual(origin, 0, "tags");
        space.free(v);
        assert_eq!(space.free_count(), 0);
    }

    #[test]
    fn virtual_ids_never_collide_with_physical() {
        let mut space = RowIdSpace::new();
        let origin = space.allocate();
        let v1 = space.mint_virtual(origin, 0, "tags");
        let v2 = space.mint_virtual(origin, 1, "tags");
        assert!(v1.is_virtual() && v2.is_virtual());
        assert_ne!(v1, v2);
        assert_ne!(v1, origin);
    }

    #[test]
    fn materialize_replaces_unwound_field_with_element() {
        let mut space = RowIdSpace::new();
        let origin = space.allocate();
        let mut doc = Document::new();
        doc.insert(
            "tags",
            Value::Array(smallvec::smallvec![Value::String("a".into()), Value::String("b".into())]),
        );
        let v = space.mint_virtual(origin, 1, "tags");
        let materialized = space.materialize(v, &doc).unwrap();
        assert_eq!(materialized.get("tags"), Some(&Value::String("b".into())));
    }

    #[test]
    fn virtual_info_resolves_origin_array_index_and_field() {
        let mut space = RowIdSpace::new();
        let origin = space.allocate();
        let v = space.mint_virtual(origin, 2, "items");
        let info = space.virtual_info(v).unwrap();
        assert_eq!(info.origin, origin);
        assert_eq!(info.array_index, 2);
        assert_eq!(info.field, "items");
    }
}
