//! Concurrent map over sharded hash buckets

use dashmap::DashMap;
use std::borrow::Borrow;
use std::hash::Hash;

/// A thread-safe map. Reads and writes are safe under arbitrary
/// concurrency; no ordering across keys is guaranteed.
pub struct ConcurrentMap<K, V> {
    inner: DashMap<K, V>,
}

impl<K: Eq + Hash, V: Clone> ConcurrentMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Set the value for a key.
    pub fn store(&self, key: K, value: V) {
        self.inner.insert(key, value);
    }

    /// Retrieve the value for a key.
    pub fn load<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.get(key).map(|entry| entry.value().clone())
    }

    /// Return the existing value for the key if present, otherwise store
    /// and return `value`.
    ///
    /// Insert-if-absent is atomic, so every caller observes the same
    /// canonical instance. This is what makes the per-key lock registries
    /// race-free.
    pub fn load_or_store(&self, key: K, value: V) -> V {
        self.inner.entry(key).or_insert(value).value().clone()
    }

    /// Remove a key, returning its value if it was present.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.remove(key).map(|(_, value)| value)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.contains_key(key)
    }

    /// Call `f` for each entry; `f` may return `false` to stop early.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        for entry in self.inner.iter() {
            if !f(entry.key(), entry.value()) {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K: Eq + Hash, V: Clone> Default for ConcurrentMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_store_load_remove() {
        let map = ConcurrentMap::new();
        map.store("a".to_string(), 1);
        assert_eq!(map.load("a"), Some(1));
        assert_eq!(map.load("b"), None);
        assert_eq!(map.remove("a"), Some(1));
        assert!(map.is_empty());
    }

    #[test]
    fn test_load_or_store_returns_canonical_instance() {
        let map: ConcurrentMap<String, Arc<AtomicUsize>> = ConcurrentMap::new();
        let first = map.load_or_store("k".to_string(), Arc::new(AtomicUsize::new(0)));
        let second = map.load_or_store("k".to_string(), Arc::new(AtomicUsize::new(0)));
        first.fetch_add(1, Ordering::SeqCst);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_range_stops_early() {
        let map = ConcurrentMap::new();
        for i in 0..10 {
            map.store(i, i);
        }
        let mut seen = 0;
        map.range(|_, _| {
            seen += 1;
            seen < 3
        });
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_concurrent_writers() {
        let map = Arc::new(ConcurrentMap::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let map = map.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        map.store(format!("{t}-{i}"), i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(map.len(), 800);
    }
}
