//! Key/value state shared between concurrent CSI calls.
//!
//! The controller keeps its short lived bookkeeping (such as the in-flight create requests)
//! behind the [`Store`] trait rather than in process globals.
use std::{collections::HashMap, fmt::Debug, hash::Hash, sync::Mutex};

/// A minimal key/value store with an atomic compare-and-swap.
pub trait Store<K, V>: Send + Sync + Debug {
    /// Get a copy of the value stored under `key`.
    fn get(&self, key: &K) -> Option<V>;
    /// Store `value` under `key`, returning the previous value.
    fn put(&self, key: K, value: V) -> Option<V>;
    /// Remove `key`, returning the previous value.
    fn delete(&self, key: &K) -> Option<V>;
    /// Atomically replace the value under `key` with `new` if the current value equals
    /// `expected`. A `None` expectation means the key must be absent and a `None` replacement
    /// removes the key. Returns whether the swap took place.
    fn compare_and_swap(&self, key: &K, expected: Option<&V>, new: Option<V>) -> bool;
}

/// In-memory [`Store`] backed by a mutex guarded map.
#[derive(Debug)]
pub struct MemStore<K, V> {
    inner: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for MemStore<K, V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> MemStore<K, V> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, V>> {
        // the map is always left consistent, so a poisoned lock is still usable
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<K, V> Store<K, V> for MemStore<K, V>
where
    K: Eq + Hash + Clone + Send + Debug,
    V: Clone + PartialEq + Send + Debug,
{
    fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).cloned()
    }

    fn put(&self, key: K, value: V) -> Option<V> {
        self.lock().insert(key, value)
    }

    fn delete(&self, key: &K) -> Option<V> {
        self.lock().remove(key)
    }

    fn compare_and_swap(&self, key: &K, expected: Option<&V>, new: Option<V>) -> bool {
        let mut map = self.lock();
        if map.get(key) != expected {
            return false;
        }
        match new {
            Some(value) => {
                map.insert(key.clone(), value);
            }
            None => {
                map.remove(key);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_and_swap() {
        let store = MemStore::<String, u64>::new();
        let key = "pvc-1".to_string();

        assert!(store.compare_and_swap(&key, None, Some(1)));
        assert!(!store.compare_and_swap(&key, None, Some(2)));
        assert_eq!(store.get(&key), Some(1));

        assert!(!store.compare_and_swap(&key, Some(&5), Some(6)));
        assert!(store.compare_and_swap(&key, Some(&1), Some(2)));
        assert_eq!(store.get(&key), Some(2));

        assert!(store.compare_and_swap(&key, Some(&2), None));
        assert!(store.is_empty());
    }

    #[test]
    fn put_get_delete() {
        let store = MemStore::<&str, &str>::new();
        assert_eq!(store.put("a", "1"), None);
        assert_eq!(store.put("a", "2"), Some("1"));
        assert_eq!(store.get(&"a"), Some("2"));
        assert_eq!(store.delete(&"a"), Some("2"));
        assert_eq!(store.get(&"a"), None);
        assert_eq!(store.len(), 0);
    }
}
