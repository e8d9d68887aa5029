// crates/reelplay-core/src/memory.rs
//
// Byte-budgeted LRU cache. The caller supplies the cost of each entry (the
// cache does not measure); whenever the total cost exceeds the budget the
// least-recently-touched entries are evicted. Values are cloned out, so
// cached items are shared handles (Arc) in practice.
//
// Not internally synchronized beyond single-call atomicity — the steady-state
// mutator is the playback cache policy running on one thread.

use std::collections::HashMap;
use std::hash::Hash;

struct Entry<V> {
    value: V,
    cost: usize,
    recency: u64,
}

pub struct LruCache<K, V> {
    max: usize,
    counter: u64,
    map: HashMap<K, Entry<V>>,
    size: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    pub fn new(max: usize) -> Self {
        Self { max, counter: 0, map: HashMap::new(), size: 0 }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn set_max(&mut self, max: usize) {
        if max == self.max {
            return;
        }
        self.max = max;
        self.evict();
    }

    /// Total cost of all entries, in the caller's units (bytes).
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn count(&self) -> usize {
        self.map.len()
    }

    pub fn percentage(&self) -> f32 {
        if self.max > 0 {
            self.size as f32 / self.max as f32 * 100.0
        } else {
            0.0
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Fetch a value and bump its recency.
    pub fn get(&mut self, key: &K) -> Option<V> {
        self.counter += 1;
        let counter = self.counter;
        self.map.get_mut(key).map(|entry| {
            entry.recency = counter;
            entry.value.clone()
        })
    }

    /// Insert or overwrite an entry, then evict past the budget.
    pub fn add(&mut self, key: K, value: V, cost: usize) {
        self.counter += 1;
        if let Some(old) = self.map.insert(key, Entry { value, cost, recency: self.counter }) {
            self.size -= old.cost;
        }
        self.size += cost;
        self.evict();
    }

    pub fn remove(&mut self, key: &K) {
        if let Some(entry) = self.map.remove(key) {
            self.size -= entry.cost;
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.size = 0;
    }

    pub fn keys(&self) -> Vec<K> {
        self.map.keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.map.values().map(|entry| entry.value.clone()).collect()
    }

    fn evict(&mut self) {
        while self.size > self.max {
            let Some(oldest) = self
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.recency)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            self.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_get() {
        let mut cache = LruCache::new(100);
        cache.add("a".to_string(), 1, 10);
        assert!(cache.contains(&"a".to_string()));
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.size(), 10);
        assert_eq!(cache.count(), 1);
        assert_eq!(cache.percentage(), 10.0);
    }

    #[test]
    fn overwrite_replaces_cost() {
        let mut cache = LruCache::new(100);
        cache.add("a".to_string(), 1, 10);
        cache.add("a".to_string(), 2, 30);
        assert_eq!(cache.size(), 30);
        assert_eq!(cache.get(&"a".to_string()), Some(2));
    }

    #[test]
    fn eviction_targets_least_recent() {
        let mut cache = LruCache::new(100);
        for i in 0..10 {
            cache.add(format!("k{i}"), i, 20);
        }
        // Five 20-byte items fit; k0..k4 were evicted in order.
        assert_eq!(cache.count(), 5);
        assert_eq!(cache.size(), 100);
        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, vec!["k5", "k6", "k7", "k8", "k9"]);
    }

    #[test]
    fn get_protects_from_eviction() {
        let mut cache = LruCache::new(60);
        cache.add("a".to_string(), 1, 20);
        cache.add("b".to_string(), 2, 20);
        cache.add("c".to_string(), 3, 20);
        // Touch "a" so "b" is now least recent.
        cache.get(&"a".to_string());
        cache.add("d".to_string(), 4, 20);
        assert!(cache.contains(&"a".to_string()));
        assert!(!cache.contains(&"b".to_string()));
    }

    #[test]
    fn set_max_shrinks() {
        let mut cache = LruCache::new(100);
        for i in 0..5 {
            cache.add(format!("k{i}"), i, 20);
        }
        cache.set_max(40);
        assert_eq!(cache.count(), 2);
        assert!(cache.contains(&"k4".to_string()));
        assert!(cache.contains(&"k3".to_string()));
    }
}
