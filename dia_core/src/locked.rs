//! Locked containers shared with drivers.
//!
//! `LockedMap` wraps an ordered map in a re-entrant lock: every method
//! takes the lock for its own duration, and [`LockedMap::hold`] lets a
//! thread keep it across several calls without deadlocking itself. No
//! method keeps the inner map borrowed while running caller code, so the
//! closure given to [`LockedMap::update`] may call back into the map.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::collections::BTreeMap;

/// Ordered map guarded by a re-entrant lock.
#[derive(Debug)]
pub struct LockedMap<K, V> {
    inner: ReentrantMutex<RefCell<BTreeMap<K, V>>>,
}

/// Guard returned by [`LockedMap::hold`].
pub type LockedMapGuard<'a, K, V> = ReentrantMutexGuard<'a, RefCell<BTreeMap<K, V>>>;

impl<K: Ord + Clone, V: Clone> LockedMap<K, V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(BTreeMap::new())),
        }
    }

    /// Keep the lock held across several operations on this thread.
    pub fn hold(&self) -> LockedMapGuard<'_, K, V> {
        self.inner.lock()
    }

    /// Insert a value, returning the previous one.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.lock().borrow_mut().insert(key, value)
    }

    /// Remove a value.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().borrow_mut().remove(key)
    }

    /// Clone of the value under `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().borrow().get(key).cloned()
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().borrow().contains_key(key)
    }

    /// Mutate the value under `key`, starting from `V::default()` if absent.
    ///
    /// The lock is held throughout, but the entry is detached from the map
    /// while `f` runs: `f` may use the map, and sees `key` as absent.
    pub fn update<F>(&self, key: K, f: F)
    where
        V: Default,
        F: FnOnce(&mut V),
    {
        let guard = self.inner.lock();
        let mut value = guard.borrow_mut().remove(&key).unwrap_or_default();
        f(&mut value);
        guard.borrow_mut().insert(key, value);
    }

    /// Keys in order.
    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().borrow().keys().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.lock().borrow().len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone of the whole map.
    pub fn snapshot(&self) -> BTreeMap<K, V> {
        self.inner.lock().borrow().clone()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.inner.lock().borrow_mut().clear();
    }
}

impl<K: Ord + Clone, V: Clone> Default for LockedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_basic_operations() {
        let map = LockedMap::new();
        assert!(map.is_empty());
        assert_eq!(map.insert("a".to_string(), 1), None);
        assert_eq!(map.insert("a".to_string(), 2), Some(1));
        assert_eq!(map.get(&"a".to_string()), Some(2));
        assert!(map.contains_key(&"a".to_string()));
        assert_eq!(map.remove(&"a".to_string()), Some(2));
        assert!(map.is_empty());
    }

    #[test]
    fn test_hold_is_reentrant() {
        let map = LockedMap::new();
        let _guard = map.hold();
        map.insert(1, "one".to_string());
        map.update(1, |v| v.push('!'));
        assert_eq!(map.get(&1).as_deref(), Some("one!"));
        assert_eq!(map.keys(), vec![1]);
    }

    #[test]
    fn test_update_closure_may_use_map() {
        let map: LockedMap<&str, usize> = LockedMap::new();
        map.insert("peers", 2);
        map.update("total", |total| {
            *total = map.get(&"peers").unwrap_or(0) + map.len();
            map.insert("seen", 1);
            assert!(!map.contains_key(&"total"));
        });
        assert_eq!(map.get(&"total"), Some(3));
        assert_eq!(map.keys(), vec!["peers", "seen", "total"]);
    }

    #[test]
    fn test_concurrent_updates() {
        let map: Arc<LockedMap<u32, u64>> = Arc::new(LockedMap::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        map.update(0, |v| *v += 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(map.get(&0), Some(4000));
    }
}
