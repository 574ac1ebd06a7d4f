//! CLOCK (second-chance) cache for decoded pages.
//!
//! Pages are immutable and keyed by file offset, so the cache never needs
//! invalidation: an entry is either absent or exactly the bytes on disk.

use std::collections::HashMap;
use std::hash::Hash;

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    referenced: bool,
}

/// Fixed-capacity CLOCK cache.
#[derive(Debug)]
pub struct ClockCache<K, V> {
    capacity: usize,
    slots: Vec<Slot<K, V>>,
    index: HashMap<K, usize>,
    hand: usize,
    stats: CacheStats,
}

impl<K: Copy + Eq + Hash, V: Clone> ClockCache<K, V> {
    /// Create a cache holding at most `capacity` entries (0 disables caching).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Vec::with_capacity(capacity.min(4096)),
            index: HashMap::new(),
            hand: 0,
            stats: CacheStats::default(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Look up `key`, marking it recently used.
    pub fn get(&mut self, key: &K) -> Option<V> {
        if let Some(&i) = self.index.get(key) {
            self.stats.hits += 1;
            let slot = &mut self.slots[i];
            slot.referenced = true;
            Some(slot.value.clone())
        } else {
            self.stats.misses += 1;
            None
        }
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or replace `key`, evicting an unreferenced entry when full.
    pub fn insert(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        if let Some(&i) = self.index.get(&key) {
            let slot = &mut self.slots[i];
            slot.value = value;
            slot.referenced = true;
            return;
        }
        if self.slots.len() < self.capacity {
            self.index.insert(key, self.slots.len());
            self.slots.push(Slot {
                key,
                value,
                referenced: false,
            });
            return;
        }
        loop {
            let hand = self.hand;
            self.hand = (self.hand + 1) % self.slots.len();
            let slot = &mut self.slots[hand];
            if slot.referenced {
                slot.referenced = false;
                continue;
            }
            self.index.remove(&slot.key);
            self.index.insert(key, hand);
            *slot = Slot {
                key,
                value,
                referenced: false,
            };
            self.stats.evictions += 1;
            return;
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.hand = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_and_miss_are_counted() {
        let mut cache: ClockCache<u64, &str> = ClockCache::new(4);
        assert_eq!(cache.get(&1), None);
        cache.insert(1, "one");
        assert_eq!(cache.get(&1), Some("one"));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn referenced_entries_get_a_second_chance() {
        let mut cache: ClockCache<u64, u64> = ClockCache::new(2);
        cache.insert(1, 10);
        cache.insert(2, 20);
        assert_eq!(cache.get(&1), Some(10));
        cache.insert(3, 30);
        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert!(cache.contains(&3));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn zero_capacity_caches_nothing() {
        let mut cache: ClockCache<u64, u64> = ClockCache::new(0);
        cache.insert(1, 1);
        assert!(cache.is_empty());
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn reinsert_replaces_value() {
        let mut cache: ClockCache<u64, u64> = ClockCache::new(2);
        cache.insert(1, 1);
        cache.insert(1, 2);
        assert_eq!(cache.get(&1), Some(2));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
