use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use fxhash::FxHashMap;

/// Keyed container safe for concurrent readers and writers.
///
/// Reads share the lock, writes are exclusive. `for_each` walks a snapshot
/// of the keys and re-fetches each value, so it holds no lock while the
/// visitor runs and tolerates concurrent mutation (deleted keys are skipped).
pub struct SharedMap<K, V> {
    inner: RwLock<FxHashMap<K, V>>,
}

impl<K, V> SharedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        SharedMap {
            inner: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.read().get(key).cloned()
    }

    pub fn set(&self, key: K, value: V) {
        self.write().insert(key, value);
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.write().remove(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Visits a snapshot of the entries. The visitor returns `true` to
    /// continue and `false` to stop.
    pub fn for_each(&self, mut visit: impl FnMut(&K, &V) -> bool) {
        for key in self.keys() {
            let Some(value) = self.get(&key) else {
                continue;
            };
            if !visit(&key, &value) {
                break;
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, FxHashMap<K, V>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, FxHashMap<K, V>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> Default for SharedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
