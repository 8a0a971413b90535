//! Row identifiers (specification §3 "Row identifier").
//!
//! A [`RowId`] is an opaque 32-bit integer partitioned into two disjoint
//! ranges: physical rows `[0, 2^31)` allocated from the store's row-id
//! space, and virtual rows `[2^31, 2^32)` minted by `$unwind` to denote one
//! element of an array. The allocator itself (with its free-list) lives in
//! `aggvm-storage`; this crate only defines the identifier and its bit
//! layout so that both storage and engine can agree on it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// High bit set denotes a virtual row id.
const VIRTUAL_BIT: u32 = 1 << 31;

/// An opaque row identifier, physical or virtual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(u32);

impl RowId {
    /// Construct a physical row id. Panics if `raw` has the virtual bit set;
    /// callers should only ever pass counter/free-list values, which are
    /// guaranteed to stay under `2^31`.
    pub fn physical(raw: u32) -> Self {
        assert!(raw & VIRTUAL_BIT == 0, "physical row id out of range: {raw}");
        RowId(raw)
    }

    /// Construct a virtual row id from its low-31-bit ordinal.
    pub fn virtual_id(ordinal: u32) -> Self {
        assert!(ordinal & VIRTUAL_BIT == 0, "virtual row ordinal out of range: {ordinal}");
        RowId(ordinal | VIRTUAL_BIT)
    }

    /// `true` if this is a virtual row id minted by `$unwind`.
    pub fn is_virtual(self) -> bool {
        self.0 & VIRTUAL_BIT != 0
    }

    /// The raw 32-bit representation.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// The free-list/counter ordinal within this id's partition (physical
    /// counter value, or virtual ordinal with the tag bit stripped).
    pub fn ordinal(self) -> u32 {
        self.0 & !VIRTUAL_BIT
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_virtual() {
            write!(f, "v{}", self.ordinal())
        } else {
            write!(f, "#{}", self.ordinal())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_and_virtual_partitions_are_disjoint() {
        let p = RowId::physical(42);
        let v = RowId::virtual_id(42);
        assert!(!p.is_virtual());
        assert!(v.is_virtual());
        assert_ne!(p, v);
        assert_eq!(p.ordinal(), v.ordinal());
    }

    #[test]
    #[should_panic]
    fn physical_rejects_virtual_bit() {
        RowId::physical(VIRTUAL_BIT);
    }

    #[test]
    fn ordering_is_raw_bit_order() {
        let low = RowId::physical(1);
        let high_physical = RowId::physical(2);
        let virt = RowId::virtual_id(0);
        assert!(low < high_physical);
        // every virtual id sorts above every physical id
        assert!(high_physical < virt);
    }
}
