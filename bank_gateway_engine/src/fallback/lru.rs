use std::{
    collections::{BTreeMap, HashMap},
    hash::Hash,
};

/// A bounded map that evicts the least recently used entry when full.
///
/// Recency is tracked with a monotonically increasing tick per access; the `BTreeMap` keyed by tick gives the oldest
/// entry in `O(log n)`.
pub struct LruCache<K, V> {
    capacity: usize,
    tick: u64,
    entries: HashMap<K, (V, u64)>,
    recency: BTreeMap<u64, K>,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), tick: 0, entries: HashMap::new(), recency: BTreeMap::new() }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Returns the value and marks it as most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let tick = self.next_tick();
        let (_, old_tick) = self.entries.get(key)?;
        let old_tick = *old_tick;
        self.recency.remove(&old_tick);
        self.recency.insert(tick, key.clone());
        let entry = self.entries.get_mut(key)?;
        entry.1 = tick;
        Some(&entry.0)
    }

    /// Inserts or replaces the value, evicting the least recently used entry if the cache is full. Returns the evicted
    /// key, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<K> {
        let tick = self.next_tick();
        if let Some((_, old_tick)) = self.entries.remove(&key) {
            self.recency.remove(&old_tick);
        }
        let mut evicted = None;
        if self.entries.len() >= self.capacity {
            if let Some((_, oldest)) = self.recency.pop_first() {
                self.entries.remove(&oldest);
                evicted = Some(oldest);
            }
        }
        self.recency.insert(tick, key.clone());
        self.entries.insert(key, (value, tick));
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, tick) = self.entries.remove(key)?;
        self.recency.remove(&tick);
        Some(value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }
}
