//
// multi_value_index.rs
//
// Generic key -> set-of-values mapping with reverse invalidation
//

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Maps a key to a deduplicating set of values.
///
/// Lookups for absent keys yield an empty set, never a failure. Besides
/// plain indexing this supports removing a given value from every bucket
/// (`invalidate_value`), which is how stale document associations are
/// dropped before re-indexing.
#[derive(Debug, Clone)]
pub struct MultiValueIndex<K, V> {
    map: HashMap<K, HashSet<V>>,
}

impl<K, V> Default for MultiValueIndex<K, V> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

impl<K, V> MultiValueIndex<K, V>
where
    K: Eq + Hash,
    V: Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` to the bucket for `key`. Idempotent.
    pub fn index(&mut self, key: K, value: V) {
        self.map.entry(key).or_default().insert(value);
    }

    /// The set of values for `key`, cloned; empty when the key is absent.
    pub fn get_values<Q>(&self, key: &Q) -> HashSet<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        V: Clone,
    {
        self.map.get(key).cloned().unwrap_or_default()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Keys currently holding at least one value, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.map.keys()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Remove `value` from every bucket that contains it, dropping buckets
    /// that become empty.
    ///
    /// This is a scan over all keys, O(keys) per call. Fine for corpora of
    /// hundreds of documents; a corpus orders of magnitude larger would
    /// want an auxiliary value -> keys map instead.
    pub fn invalidate_value<Q>(&mut self, value: &Q)
    where
        V: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.map.retain(|_, bucket| {
            bucket.remove(value);
            !bucket.is_empty()
        });
    }

    /// Number of keys with at least one value.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
