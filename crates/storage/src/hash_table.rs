//! Robin-Hood open-addressed hash table for group keys (specification §4.7,
//! `$group`).
//!
//! Standard linear-probing robin hood hashing: on insertion, an entry that
//! has probed further than the one currently occupying a slot "steals" it,
//! and the displaced entry continues probing from there. This bounds the
//! variance of probe lengths regardless of insertion order, which matters
//! here because group keys arrive in arbitrary, data-dependent order.

use aggvm_core::{hash_value, Value};
use std::hash::{Hash, Hasher};

/// A compound group-by key: the tuple of values produced by a `$group`
/// stage's `_id` expression, canonically ordered by expression position so
/// that two rows with equal key tuples always hash and compare equal.
#[derive(Debug, Clone)]
pub struct GroupKey(Vec<Value>);

impl GroupKey {
    /// Wrap a tuple of already-evaluated key component values.
    pub fn new(components: Vec<Value>) -> Self {
        GroupKey(components)
    }

    /// Borrow the key's components in canonical (expression) order.
    pub fn components(&self) -> &[Value] {
        &self.0
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a == b)
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for component in &self.0 {
            hash_value(component).hash(state);
        }
    }
}

const DEFAULT_CAPACITY: usize = 16;
const MAX_LOAD_FACTOR_NUM: usize = 9;
const MAX_LOAD_FACTOR_DEN: usize = 10;

struct Slot<K, V> {
    key: K,
    value: V,
    probe_distance: u32,
}

/// An open-addressed, robin-hood-probed hash map keyed on [`GroupKey`]-like
/// types. Capacity is always a power of two so that the bucket index is a
/// cheap mask rather than a modulo.
pub struct RobinHoodMap<K, V> {
    slots: Vec<Option<Slot<K, V>>>,
    len: usize,
}

impl<K: Hash + Eq, V> Default for RobinHoodMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq, V> RobinHoodMap<K, V> {
    /// A table with the default starting capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A table sized to hold at least `capacity` entries before its first
    /// resize, rounded up to the next power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        RobinHoodMap { slots, len: 0 }
    }

    /// Number of entries stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    fn bucket_for(&self, key: &K) -> usize {
        let mut hasher = rustc_hash::FxHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & self.mask()
    }

    /// Insert `key => value`, returning the previous value if the key was
    /// already present.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if (self.len + 1) * MAX_LOAD_FACTOR_DEN > self.slots.len() * MAX_LOAD_FACTOR_NUM {
            self.grow();
        }
        let mut index = self.bucket_for(&key);
        let mut incoming = Slot {
            key,
            value,
            probe_distance: 0,
        };
        loop {
            match &mut self.slots[index] {
                None => {
                    self.slots[index] = Some(incoming);
                    self.len += 1;
                    return None;
                }
                Some(resident) if resident.key == incoming.key => {
                    return Some(std::mem::replace(&mut resident.value, incoming.value));
                }
                Some(resident) => {
                    if resident.probe_distance < incoming.probe_distance {
                        std::mem::swap(resident, &mut incoming);
                    }
                }
            }
            incoming.probe_distance += 1;
            index = (index + 1) & self.mask();
        }
    }

    fn find_index(&self, key: &K) -> Option<usize> {
        let mut index = self.bucket_for(key);
        let mut distance = 0u32;
        loop {
            match &self.slots[index] {
                None => return None,
                Some(resident) => {
                    if resident.key == *key {
                        return Some(index);
                    }
                    if resident.probe_distance < distance {
                        return None;
                    }
                }
            }
            distance += 1;
            index = (index + 1) & self.mask();
        }
    }

    /// Look up a value by key.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.find_index(key).map(|i| &self.slots[i].as_ref().unwrap().value)
    }

    /// Look up a mutable reference to a value by key.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let index = self.find_index(key)?;
        Some(&mut self.slots[index].as_mut().unwrap().value)
    }

    /// Remove a key, backward-shifting subsequent entries so probe chains
    /// stay contiguous (the standard robin-hood deletion technique).
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let index = self.find_index(key)?;
        let removed = self.slots[index].take().unwrap();
        let mut hole = index;
        loop {
            let next = (hole + 1) & self.mask();
            let shift = match &mut self.slots[next] {
                Some(slot) if slot.probe_distance > 0 => {
                    slot.probe_distance -= 1;
                    true
                }
                _ => false,
            };
            if !shift {
                break;
            }
            self.slots[hole] = self.slots[next].take();
            hole = next;
        }
        self.len -= 1;
        Some(removed.value)
    }

    fn grow(&mut self) {
        let new_capacity = (self.slots.len() * 2).max(DEFAULT_CAPACITY);
        let mut new_slots = Vec::with_capacity(new_capacity);
        new_slots.resize_with(new_capacity, || None);
        let old = std::mem::replace(&mut self.slots, new_slots);
        self.len = 0;
        for slot in old.into_iter().flatten() {
            self.insert(slot.key, slot.value);
        }
    }

    /// Iterate `(key, value)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots.iter().filter_map(|s| s.as_ref()).map(|s| (&s.key, &s.value))
    }

    /// Iterate `(key, &mut value)` pairs in no particular order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.slots.iter_mut().filter_map(|s| s.as_mut()).map(|s| (&s.key, &mut s.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_roundtrip() {
        let mut map = RobinHoodMap::new();
        map.insert(GroupKey::new(vec![Value::String("a".into())]), 1u64);
        map.insert(GroupKey::new(vec![Value::String("b".into())]), 2u64);
        assert_eq!(map.get(&GroupKey::new(vec![Value::String("a".into())])), Some(&1));
        assert_eq!(map.get(&GroupKey::new(vec![Value::String("b".into())])), Some(&2));
    }

    #[test]
    fn insert_same_key_replaces_value() {
        let mut map = RobinHoodMap::new();
        let key = GroupKey::new(vec![Value::Int(1)]);
        map.insert(key.clone(), 10u64);
        let old = map.insert(key.clone(), 20u64);
        assert_eq!(old, Some(10));
        assert_eq!(map.get(&key), Some(&20));
    }

    #[test]
    fn remove_then_lookup_returns_none() {
        let mut map = RobinHoodMap::new();
        let key = GroupKey::new(vec![Value::Int(7)]);
        map.insert(key.clone(), 1u64);
        assert_eq!(map.remove(&key), Some(1));
        assert_eq!(map.get(&key), None);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn grows_past_default_capacity_without_losing_entries() {
        let mut map = RobinHoodMap::new();
        for i in 0..500i64 {
            map.insert(GroupKey::new(vec![Value::Int(i)]), i as u64);
        }
        assert_eq!(map.len(), 500);
        for i in 0..500i64 {
            assert_eq!(map.get(&GroupKey::new(vec![Value::Int(i)])), Some(&(i as u64)));
        }
    }

    #[test]
    fn remove_preserves_lookups_for_surviving_entries_under_collisions() {
        let mut map = RobinHoodMap::with_capacity(4);
        for i in 0..20i64 {
            map.insert(GroupKey::new(vec![Value::Int(i)]), i as u64);
        }
        for i in (0..20i64).step_by(2) {
            map.remove(&GroupKey::new(vec![Value::Int(i)]));
        }
        for i in 0..20i64 {
            let expected = if i % 2 == 0 { None } else { Some(&(i as u64)) };
            assert_eq!(map.get(&GroupKey::new(vec![Value::Int(i)])), expected);
        }
    }

    #[test]
    fn int_and_double_keys_collide_like_values() {
        let mut map = RobinHoodMap::new();
        map.insert(GroupKey::new(vec![Value::Int(3)]), 1u64);
        assert_eq!(map.get(&GroupKey::new(vec![Value::Double(3.0)])), Some(&1));
    }
}
