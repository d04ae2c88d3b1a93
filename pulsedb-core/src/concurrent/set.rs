//! Concurrent set

use dashmap::DashMap;
use std::borrow::Borrow;
use std::hash::Hash;

/// A thread-safe set with the same concurrency properties as
/// [`super::ConcurrentMap`].
pub struct ConcurrentSet<T> {
    inner: DashMap<T, ()>,
}

impl<T: Eq + Hash + Clone> ConcurrentSet<T> {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Add an item; returns `true` if it was not already present.
    pub fn add(&self, item: T) -> bool {
        self.inner.insert(item, ()).is_none()
    }

    pub fn remove<Q>(&self, item: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.remove(item).is_some()
    }

    pub fn contains<Q>(&self, item: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.contains_key(item)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Snapshot of all items, unordered.
    pub fn items(&self) -> Vec<T> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&T),
    {
        for entry in self.inner.iter() {
            f(entry.key());
        }
    }

    /// New set containing the elements of both sets.
    pub fn union(&self, other: &Self) -> Self {
        let result = Self::new();
        self.for_each(|item| {
            result.add(item.clone());
        });
        other.for_each(|item| {
            result.add(item.clone());
        });
        result
    }

    /// New set containing the elements present in both sets.
    pub fn intersection(&self, other: &Self) -> Self {
        let result = Self::new();
        self.for_each(|item| {
            if other.contains(item) {
                result.add(item.clone());
            }
        });
        result
    }
}

impl<T: Eq + Hash + Clone> Default for ConcurrentSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove_contains() {
        let set = ConcurrentSet::new();
        assert!(set.add("a"));
        assert!(!set.add("a"));
        assert!(set.contains("a"));
        assert_eq!(set.len(), 1);
        assert!(set.remove("a"));
        assert!(!set.remove("a"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_items_snapshot() {
        let set = ConcurrentSet::new();
        set.add(1);
        set.add(2);
        let mut items = set.items();
        items.sort_unstable();
        assert_eq!(items, vec![1, 2]);
    }

    #[test]
    fn test_union_and_intersection() {
        let a = ConcurrentSet::new();
        let b = ConcurrentSet::new();
        for i in 0..4 {
            a.add(i);
        }
        for i in 2..6 {
            b.add(i);
        }

        let mut union = a.union(&b).items();
        union.sort_unstable();
        assert_eq!(union, vec![0, 1, 2, 3, 4, 5]);

        let mut inter = a.intersection(&b).items();
        inter.sort_unstable();
        assert_eq!(inter, vec![2, 3]);
    }
}
