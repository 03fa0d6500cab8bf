//! Claim sets with RAII release.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A set of keys currently claimed by some piece of work.
///
/// `try_claim` hands out a guard; dropping the guard releases the key. The
/// inner mutex is only held for map operations, never across an await.
pub struct InFlightSet<K, V> {
    inner: Arc<Mutex<HashMap<K, V>>>,
}

impl<K, V> Clone for InFlightSet<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for InFlightSet<K, V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> InFlightSet<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, V>> {
        // The map stays consistent even if a holder panicked mid-insert.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `key`, or `None` if it is already claimed.
    pub fn try_claim(&self, key: K, value: V) -> Option<InFlightGuard<K, V>> {
        let mut map = self.lock();
        if map.contains_key(&key) {
            return None;
        }
        map.insert(key.clone(), value);
        Some(InFlightGuard {
            set: self.clone(),
            key,
        })
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current claims.
    pub fn snapshot(&self) -> Vec<(K, V)> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn release(&self, key: &K) {
        self.lock().remove(key);
    }
}

/// Releases its key when dropped.
pub struct InFlightGuard<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    set: InFlightSet<K, V>,
    key: K,
}

impl<K, V> InFlightGuard<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K, V> Drop for InFlightGuard<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn drop(&mut self) {
        self.set.release(&self.key);
    }
}

impl<K, V> fmt::Debug for InFlightGuard<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightGuard").field("key", &self.key).finish()
    }
}
