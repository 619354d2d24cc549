use ahash::AHashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::warn;

use super::expiring::{ExpiringCache, TtlStatus};
use crate::clock::Clock;

/// An [`ExpiringCache`] behind a per-instance mutex.
///
/// Every read may evict, so `get` and `ttl` take the same lock as `set`.
pub struct SharedCache<V> {
    inner: Mutex<ExpiringCache<V>>,
}

impl<V> SharedCache<V> {
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self { inner: Mutex::new(ExpiringCache::new(name, clock)) }
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        self.lock().set(key, value, ttl);
    }

    pub fn ttl(&self, key: &str) -> TtlStatus {
        self.lock().ttl(key)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().delete(key)
    }

    pub fn evict_expired(&self) -> usize {
        self.lock().evict_expired()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Run a compound read-modify-write under a single lock acquisition.
    pub fn with<R>(&self, f: impl FnOnce(&mut ExpiringCache<V>) -> R) -> R {
        f(&mut self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, ExpiringCache<V>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("Cache lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }
}

impl<V: Clone> SharedCache<V> {
    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().get(key).cloned()
    }
}

/// Named caches created on first use.
pub struct CacheRegistry<V> {
    caches: RwLock<AHashMap<String, Arc<SharedCache<V>>>>,
    clock: Arc<dyn Clock>,
}

impl<V> CacheRegistry<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { caches: RwLock::new(AHashMap::new()), clock }
    }

    /// Cache registered under `name`, creating an empty one if needed.
    pub fn get_or_create(&self, name: &str) -> Arc<SharedCache<V>> {
        if let Some(cache) = self.get(name) {
            return cache;
        }

        let mut caches = self
            .caches
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(SharedCache::new(name, self.clock.clone())))
            .clone()
    }

    /// Cache registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Arc<SharedCache<V>>> {
        match self.caches.read() {
            Ok(guard) => guard.get(name).cloned(),
            Err(_) => {
                warn!(cache = name, "Cache registry lock poisoned");
                None
            }
        }
    }

    /// Snapshot of every registered cache with its name.
    pub fn all(&self) -> Vec<(String, Arc<SharedCache<V>>)> {
        let caches = self.caches.read().unwrap_or_else(PoisonError::into_inner);
        caches
            .iter()
            .map(|(name, cache)| (name.clone(), cache.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.caches.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregister every empty cache nobody else holds. Returns the number removed.
    ///
    /// A cache handed out by [`get_or_create`](Self::get_or_create) and still in use is
    /// kept, so a concurrent writer never ends up in an orphaned cache.
    pub fn prune_empty(&self) -> usize {
        let mut caches = self
            .caches
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = caches.len();
        caches.retain(|_, cache| Arc::strong_count(cache) > 1 || !cache.is_empty());
        before - caches.len()
    }

    /// Run the compaction pass over every cache. Returns the total number of evicted keys.
    pub fn evict_expired(&self) -> usize {
        self.all()
            .iter()
            .map(|(_, cache)| cache.evict_expired())
            .sum()
    }
}
