//! LFU caching with hit-rate tuning.
//!
//! The distance cache remembers rough distances per fingerprint pair. On
//! insertion into a full cache the least-frequently-used entry is evicted,
//! ties broken by least-recent access. A sampler periodically compares the
//! hit rate to a floor and drops to pass-through mode for the remainder of
//! the call when caching is not paying for itself.

use std::collections::HashMap;
use std::hash::Hash;

use tracing::debug;

/// Hit-rate floor below which the tuned cache turns itself off.
const HIT_RATE_FLOOR: f64 = 0.05;

struct Slot<V> {
    value: V,
    freq: u64,
    last_access: u64,
}

/// A least-frequently-used cache with bounded capacity.
#[derive(Default)]
pub struct LfuCache<K: Eq + Hash, V> {
    capacity: usize,
    map: HashMap<K, Slot<V>>,
    tick: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> LfuCache<K, V> {
    /// A cache holding at most `capacity` entries; zero disables storage.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::new(),
            tick: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        self.tick += 1;
        let tick = self.tick;
        let slot = self.map.get_mut(key)?;
        slot.freq += 1;
        slot.last_access = tick;
        Some(slot.value.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        self.tick += 1;
        if self.map.len() >= self.capacity && !self.map.contains_key(&key) {
            self.evict_one();
        }
        self.map.insert(
            key,
            Slot {
                value,
                freq: 1,
                last_access: self.tick,
            },
        );
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    fn evict_one(&mut self) {
        let victim = self
            .map
            .iter()
            .min_by_key(|(_, s)| (s.freq, s.last_access))
            .map(|(k, _)| k.clone());
        if let Some(k) = victim {
            self.map.remove(&k);
        }
    }
}

/// An [`LfuCache`] wrapped with a hit-rate sampler.
pub struct TunedCache<K: Eq + Hash, V> {
    inner: LfuCache<K, V>,
    sample_size: usize,
    queries: u64,
    hits: u64,
    enabled: bool,
}

impl<K: Eq + Hash + Clone, V: Clone> TunedCache<K, V> {
    /// `sample_size` of zero disables tuning; the cache then runs for the
    /// whole call.
    pub fn new(capacity: usize, sample_size: usize) -> Self {
        Self {
            inner: LfuCache::new(capacity),
            sample_size,
            queries: 0,
            hits: 0,
            enabled: capacity > 0,
        }
    }

    /// Total hits observed.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        if !self.enabled {
            return None;
        }
        self.queries += 1;
        let hit = self.inner.get(key);
        if hit.is_some() {
            self.hits += 1;
        }
        self.maybe_tune();
        hit
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.enabled {
            self.inner.insert(key, value);
        }
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    fn maybe_tune(&mut self) {
        if self.sample_size == 0 || self.queries % self.sample_size as u64 != 0 {
            return;
        }
        let rate = self.hits as f64 / self.queries as f64;
        if rate < HIT_RATE_FLOOR {
            debug!(
                hit_rate = rate,
                queries = self.queries,
                "distance cache hit rate below floor, switching to pass-through"
            );
            self.enabled = false;
            self.inner.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_frequent_then_least_recent() {
        let mut cache = LfuCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Bump "a" so "b" becomes the LFU victim.
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn tie_break_is_least_recent() {
        let mut cache = LfuCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Equal frequency; "a" is older.
        cache.insert("c", 3);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn zero_capacity_is_pass_through() {
        let mut cache = LfuCache::new(0);
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn tuner_disables_a_cold_cache() {
        let mut cache: TunedCache<u64, u64> = TunedCache::new(16, 10);
        for i in 0..10 {
            assert_eq!(cache.get(&i), None);
        }
        // Ten misses out of ten queries trips the floor.
        cache.insert(99, 1);
        assert_eq!(cache.get(&99), None);
    }

    #[test]
    fn tuner_keeps_a_warm_cache() {
        let mut cache: TunedCache<u64, u64> = TunedCache::new(16, 10);
        cache.insert(1, 1);
        for _ in 0..10 {
            assert_eq!(cache.get(&1), Some(1));
        }
        assert_eq!(cache.hits(), 10);
        cache.insert(2, 2);
        assert_eq!(cache.get(&2), Some(2));
    }
}
