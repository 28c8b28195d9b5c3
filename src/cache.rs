//! `ValueCache` — the per-owner last-known-value map (spec.md §4.1). A cache
//! instance is owned by exactly one protocol processor or data handler and
//! touched only from that owner's thread (spec.md §4.1 "Thread contract"),
//! so unlike the teacher's `device_map.rs` registries this needs no
//! `Mutex`: single-owner discipline is the whole point.

use std::collections::BTreeMap;

use crate::model::{RemoteObject, RemoteObjectMessageData, ValueType};

#[derive(Debug, Default)]
pub struct ValueCache {
    entries: BTreeMap<RemoteObject, RemoteObjectMessageData>,
}

impl ValueCache {
    pub fn new() -> Self {
        ValueCache {
            entries: BTreeMap::new(),
        }
    }

    pub fn contains(&self, ro: &RemoteObject) -> bool {
        self.entries.contains_key(ro)
    }

    /// Returns the cached entry, inserting a `None`-typed placeholder first
    /// if one doesn't exist yet (spec.md §4.1 `get`).
    pub fn get(&mut self, ro: RemoteObject) -> &RemoteObjectMessageData {
        self.entries
            .entry(ro)
            .or_insert_with(|| RemoteObjectMessageData::empty(ro.addressing))
    }

    pub fn peek(&self, ro: &RemoteObject) -> Option<&RemoteObjectMessageData> {
        self.entries.get(ro)
    }

    pub fn get_int(&self, ro: &RemoteObject) -> i32 {
        self.entries.get(ro).and_then(|d| d.as_int()).unwrap_or(0)
    }

    pub fn get_float(&self, ro: &RemoteObject) -> f32 {
        self.entries.get(ro).and_then(|d| d.as_float()).unwrap_or(0.0)
    }

    pub fn get_dual_float(&self, ro: &RemoteObject) -> (f32, f32) {
        match self.entries.get(ro).and_then(|d| d.as_floats()) {
            Some(v) if v.len() >= 2 => (v[0], v[1]),
            _ => (0.0, 0.0),
        }
    }

    pub fn get_triple_float(&self, ro: &RemoteObject) -> (f32, f32, f32) {
        match self.entries.get(ro).and_then(|d| d.as_floats()) {
            Some(v) if v.len() >= 3 => (v[0], v[1], v[2]),
            _ => (0.0, 0.0, 0.0),
        }
    }

    pub fn get_string(&self, ro: &RemoteObject) -> String {
        self.entries
            .get(ro)
            .and_then(|d| d.as_string())
            .unwrap_or_default()
    }

    /// Deep-copies `data` into the cache; reuses the existing buffer if its
    /// size is unchanged, otherwise reallocates (spec.md §4.1, §3 Lifecycle,
    /// invariant P1).
    pub fn set(&mut self, ro: RemoteObject, data: RemoteObjectMessageData) {
        match self.entries.get_mut(&ro) {
            Some(existing) => existing.assign_reusing_buffer(data),
            None => {
                self.entries.insert(ro, data);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RemoteObject, &RemoteObjectMessageData)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn type_and_arity_match(data: &RemoteObjectMessageData, expected: ValueType, count: u32) -> bool {
    data.value_type == expected && data.value_count == count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RemoteObjectAddressing as Addr, RemoteObjectIdentifier as Roi};

    fn ro(addr_first: i32) -> RemoteObject {
        RemoteObject::new(Roi::MatrixInput_Gain, Addr::channel(addr_first))
    }

    #[test]
    fn p1_set_then_get_with_unchanged_size_is_bitwise_equal() {
        let mut cache = ValueCache::new();
        let key = ro(1);
        cache.set(key, RemoteObjectMessageData::from_float(Addr::channel(1), -6.0));
        cache.set(key, RemoteObjectMessageData::from_float(Addr::channel(1), 3.0));
        assert_eq!(cache.get_float(&key), 3.0);
    }

    #[test]
    fn p1_set_with_changed_size_reallocates_and_reads_new_value() {
        let mut cache = ValueCache::new();
        let key = ro(1);
        cache.set(key, RemoteObjectMessageData::from_float(Addr::channel(1), -6.0));
        cache.set(
            key,
            RemoteObjectMessageData::from_floats(Addr::channel(1), &[1.0, 2.0, 3.0]),
        );
        assert_eq!(cache.get_triple_float(&key), (1.0, 2.0, 3.0));
    }

    #[test]
    fn missing_entry_returns_type_defaults() {
        let cache = ValueCache::new();
        let key = ro(9);
        assert_eq!(cache.get_int(&key), 0);
        assert_eq!(cache.get_string(&key), "");
        assert!(!cache.contains(&key));
    }

    #[test]
    fn get_inserts_a_placeholder() {
        let mut cache = ValueCache::new();
        let key = ro(2);
        let _ = cache.get(key);
        assert!(cache.contains(&key));
    }

    #[test]
    fn clear_empties_the_cache() {
        let mut cache = ValueCache::new();
        cache.set(ro(1), RemoteObjectMessageData::from_int(Addr::channel(1), 1));
        cache.clear();
        assert!(cache.is_empty());
    }
}
