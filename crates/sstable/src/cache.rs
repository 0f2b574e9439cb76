//! Charge-based LRU cache shared between readers.
//!
//! Values are handed out as `Arc<V>`, so evicting an entry only drops the
//! cache's reference: a reader that already holds the value keeps using it
//! until it is done.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Slot<V> {
    value: Arc<V>,
    charge: usize,
    tick: u64,
}

struct Inner<K, V> {
    capacity: usize,
    usage: usize,
    next_tick: u64,
    map: HashMap<K, Slot<V>>,
    /// Access tick to key, oldest first.
    order: BTreeMap<u64, K>,
}

impl<K: Hash + Eq + Clone, V> Inner<K, V> {
    fn touch(&mut self, key: &K) -> Option<Arc<V>> {
        let tick = self.next_tick;
        let slot = self.map.get_mut(key)?;
        self.order.remove(&slot.tick);
        slot.tick = tick;
        self.order.insert(tick, key.clone());
        self.next_tick += 1;
        Some(Arc::clone(&slot.value))
    }

    fn remove(&mut self, key: &K) -> Option<Slot<V>> {
        let slot = self.map.remove(key)?;
        self.order.remove(&slot.tick);
        self.usage -= slot.charge;
        Some(slot)
    }

    fn evict_to(&mut self, limit: usize) {
        while self.usage > limit {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            if let Some(slot) = self.map.remove(&key) {
                self.usage -= slot.charge;
            }
        }
    }
}

pub struct LruCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    /// `capacity` is in the same unit as the charges passed to
    /// [`insert`](Self::insert).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                capacity,
                usage: 0,
                next_tick: 0,
                map: HashMap::new(),
                order: BTreeMap::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let found = self.inner.lock().touch(key);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Inserts or replaces `key`, then evicts least recently used entries
    /// until usage fits the capacity. An entry larger than the whole cache
    /// is returned to the caller without being retained.
    pub fn insert(&self, key: K, value: Arc<V>, charge: usize) -> Arc<V> {
        let mut inner = self.inner.lock();
        inner.remove(&key);
        if charge > inner.capacity {
            return value;
        }
        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.usage += charge;
        inner.order.insert(tick, key.clone());
        inner.map.insert(
            key,
            Slot {
                value: Arc::clone(&value),
                charge,
                tick,
            },
        );
        let cap = inner.capacity;
        inner.evict_to(cap);
        value
    }

    pub fn erase(&self, key: &K) {
        self.inner.lock().remove(key);
    }

    /// Drops every entry for which `pred` holds.
    pub fn erase_if(&self, mut pred: impl FnMut(&K) -> bool) {
        let mut inner = self.inner.lock();
        let doomed: Vec<K> = inner.map.keys().filter(|k| pred(k)).cloned().collect();
        for k in doomed {
            inner.remove(&k);
        }
    }

    #[must_use]
    pub fn usage(&self) -> usize {
        self.inner.lock().usage
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.capacity = capacity;
        inner.evict_to(capacity);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the cached values, in no particular order. Does not
    /// touch recency.
    #[must_use]
    pub fn values(&self) -> Vec<Arc<V>> {
        self.inner.lock().map.values().map(|s| Arc::clone(&s.value)).collect()
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl<K, V> std::fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LruCache")
            .field("capacity", &inner.capacity)
            .field("usage", &inner.usage)
            .field("entries", &inner.map.len())
            .finish()
    }
}
