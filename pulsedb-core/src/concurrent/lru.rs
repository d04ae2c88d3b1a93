//! Bounded LRU with an eviction callback
//!
//! The file-handle pool needs to know when an entry falls out of the
//! cache so the descriptor can be released; a plain concurrent map would
//! silently leak evicted handles.

use lru::LruCache;
use parking_lot::Mutex;
use std::borrow::Borrow;
use std::hash::Hash;
use std::num::NonZeroUsize;

type EvictFn<K, V> = Box<dyn Fn(K, V) + Send + Sync>;

/// A bounded, thread-safe LRU map.
///
/// `put` and `get` promote the touched entry. When an insert overflows
/// the capacity, exactly one entry (the least recently used) is removed
/// and handed to the eviction callback, which runs inside the lock.
/// `remove` bypasses the callback.
pub struct EvictingLru<K: Eq + Hash, V> {
    inner: Mutex<LruCache<K, V>>,
    on_evict: Option<EvictFn<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> EvictingLru<K, V> {
    /// LRU without an eviction callback. Capacities below 1 are
    /// normalised to 1.
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    /// LRU invoking `on_evict` with each entry displaced by an insert.
    pub fn with_evict(
        capacity: usize,
        on_evict: impl Fn(K, V) + Send + Sync + 'static,
    ) -> Self {
        Self::build(capacity, Some(Box::new(on_evict)))
    }

    fn build(capacity: usize, on_evict: Option<EvictFn<K, V>>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            on_evict,
        }
    }

    /// Insert or update `key`, promoting it to most recently used.
    pub fn put(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        if let Some((old_key, old_value)) = inner.push(key.clone(), value) {
            // push returns the displaced entry; for an existing key that
            // is the replaced value, not an eviction
            if old_key != key {
                if let Some(on_evict) = &self.on_evict {
                    on_evict(old_key, old_value);
                }
            }
        }
    }

    /// Look up `key`, promoting it on a hit.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.lock().get(key).cloned()
    }

    /// Remove `key` without invoking the eviction callback.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.lock().pop(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Iterate entries without promoting them; `f` may return `false` to
    /// stop early.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let inner = self.inner.lock();
        for (key, value) in inner.iter() {
            if !f(key, value) {
                break;
            }
        }
    }
}
