//! Sharded maps keyed by opaque integer identifiers.
//!
//! Every shared index in Lockbay (customer index, ticket records, package
//! ledger, expiration watches) lives in a [`ShardedMap`], so operations on
//! unrelated lockers land on different locks.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Default shard count. A power of two keeps the modulo cheap.
pub const DEFAULT_SHARDS: usize = 16;

/// `u64`-keyed map split across independently locked shards.
///
/// Closures passed to [`ShardedMap::with`] run while the shard lock is held
/// and must not call back into the same map.
pub struct ShardedMap<V> {
    shards: Box<[Mutex<HashMap<u64, V>>]>,
}

impl<V> ShardedMap<V> {
    /// Map with [`DEFAULT_SHARDS`] shards.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Map with `count` shards (at least one).
    pub fn with_shards(count: usize) -> Self {
        let shards = (0..count.max(1)).map(|_| Mutex::new(HashMap::new())).collect();
        Self { shards }
    }

    fn shard(&self, key: u64) -> &Mutex<HashMap<u64, V>> {
        let count = self.shards.len() as u64;
        let index = usize::try_from(key % count).unwrap_or(0);
        &self.shards[index]
    }

    /// Runs `f` against the shard owning `key`.
    pub fn with<R>(&self, key: u64, f: impl FnOnce(&mut HashMap<u64, V>) -> R) -> R {
        let mut shard = self.shard(key).lock();
        f(&mut shard)
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(&self, key: u64, value: V) -> Option<V> {
        self.with(key, |map| map.insert(key, value))
    }

    /// Removes a value, returning it if present.
    pub fn remove(&self, key: u64) -> Option<V> {
        self.with(key, |map| map.remove(&key))
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: u64) -> bool {
        self.with(key, |map| map.contains_key(&key))
    }

    /// Total number of entries across all shards.
    ///
    /// Shards are locked one at a time, so the count is only a snapshot.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Whether every shard is empty.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.lock().is_empty())
    }

    /// Keeps only the entries for which `keep` returns true, returning how
    /// many were removed.
    pub fn retain(&self, mut keep: impl FnMut(&V) -> bool) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let mut shard = shard.lock();
                let before = shard.len();
                shard.retain(|_, value| keep(value));
                before - shard.len()
            })
            .sum()
    }

    /// Removes and returns every entry.
    pub fn drain(&self) -> Vec<(u64, V)> {
        self.shards.iter().flat_map(|shard| shard.lock().drain().collect::<Vec<_>>()).collect()
    }
}

impl<V: Clone> ShardedMap<V> {
    /// Returns a clone of the value stored under `key`.
    pub fn get(&self, key: u64) -> Option<V> {
        self.with(key, |map| map.get(&key).cloned())
    }
}

impl<V> Default for ShardedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for ShardedMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedMap").field("shards", &self.shards.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_shards_rounds_up_to_one() {
        let map = ShardedMap::with_shards(0);
        map.insert(42, "x");
        assert_eq!(map.get(42), Some("x"));
    }

    #[test]
    fn entries_spread_over_shards_stay_addressable() {
        let map = ShardedMap::with_shards(4);
        for key in 0..64 {
            map.insert(key, key * 10);
        }

        assert_eq!(map.len(), 64);
        assert_eq!(map.get(17), Some(170));
        assert_eq!(map.remove(17), Some(170));
        assert!(!map.contains_key(17));
        assert_eq!(map.len(), 63);
    }

    #[test]
    fn retain_counts_removed_entries() {
        let map = ShardedMap::with_shards(3);
        for key in 0..20 {
            map.insert(key, key % 2 == 0);
        }

        assert_eq!(map.retain(|&even| even), 10);
        assert_eq!(map.len(), 10);
        assert_eq!(map.get(4), Some(true));
        assert!(!map.contains_key(5));
    }

    #[test]
    fn drain_empties_every_shard() {
        let map = ShardedMap::new();
        for key in 0..10 {
            map.insert(key, ());
        }

        assert_eq!(map.drain().len(), 10);
        assert!(map.is_empty());
    }
}
