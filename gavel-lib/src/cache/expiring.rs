//! Key/value store with optional per-key expiry and lazy eviction.
//!
//! An entry whose expiry instant has passed is *logically absent*: it stays in memory
//! until the next `get`/`ttl` on that key removes it. There is no background sweep;
//! callers that want one run [`ExpiringCache::evict_expired`] explicitly.

use ahash::AHashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{duration_ms, Clock};

/// Result of a [`ExpiringCache::ttl`] query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    /// No value is stored under the key.
    NotExist,
    /// The value is stored without an expiry.
    NoExpiry,
    /// The expiry had passed; the key was removed by this query.
    Expired,
    /// Time left before the key expires (always > 0).
    Remaining(Duration),
}

impl TtlStatus {
    /// Remaining time if the key is live with an expiry.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            TtlStatus::Remaining(left) => Some(*left),
            _ => None,
        }
    }
}

/// A named key/value cache with lazy expiry.
///
/// Values and expiry instants live in two independent maps. [`union`](Self::union) and
/// [`difference`](Self::difference) operate on each map separately, so combining
/// inconsistent inputs can leave a key with a value from one side and an expiry from the
/// other.
pub struct ExpiringCache<V> {
    name: String,
    values: AHashMap<String, V>,
    // Expiry instants in Unix milliseconds.
    expiries: AHashMap<String, u64>,
    clock: Arc<dyn Clock>,
}

impl<V> ExpiringCache<V> {
    /// Create an empty cache reading time from `clock`.
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self { name: name.into(), values: AHashMap::new(), expiries: AHashMap::new(), clock }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or overwrite `key`.
    ///
    /// With `ttl` the entry expires at `now + ttl`; without it any previous expiry is
    /// cleared and the entry becomes permanent.
    pub fn set(&mut self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        match ttl {
            Some(ttl) => {
                let expire_at = self.now().saturating_add(duration_ms(ttl));
                self.expiries.insert(key.clone(), expire_at);
            }
            None => {
                self.expiries.remove(&key);
            }
        }
        self.values.insert(key, value);
    }

    /// Insert `key` with an absolute expiry instant (Unix ms).
    ///
    /// Used when restoring persisted entries whose deadline was recorded earlier.
    pub fn set_until(&mut self, key: impl Into<String>, value: V, expire_at_ms: Option<u64>) {
        let key = key.into();
        match expire_at_ms {
            Some(at) => {
                self.expiries.insert(key.clone(), at);
            }
            None => {
                self.expiries.remove(&key);
            }
        }
        self.values.insert(key, value);
    }

    /// Read `key`, evicting it first if its expiry has passed.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        if self.is_expired(key) {
            self.delete(key);
            return None;
        }
        self.values.get(key)
    }

    /// Remaining lifetime of `key`. An expired key is removed as a side effect.
    pub fn ttl(&mut self, key: &str) -> TtlStatus {
        if !self.values.contains_key(key) {
            return TtlStatus::NotExist;
        }
        let Some(&expire_at) = self.expiries.get(key) else {
            return TtlStatus::NoExpiry;
        };

        let now = self.now();
        if expire_at <= now {
            self.delete(key);
            return TtlStatus::Expired;
        }
        TtlStatus::Remaining(Duration::from_millis(expire_at - now))
    }

    /// Remove `key` and its expiry. Returns whether a value was present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.expiries.remove(key);
        self.values.remove(key).is_some()
    }

    /// Drop every entry whose expiry has passed. Returns the number of removed keys.
    ///
    /// This is the opt-in compaction pass; normal reads never call it.
    pub fn evict_expired(&mut self) -> usize {
        let now = self.now();
        let expired: Vec<String> = self
            .expiries
            .iter()
            .filter(|&(_, &at)| at <= now)
            .map(|(k, _)| k.clone())
            .collect();

        let mut removed = 0;
        for key in &expired {
            if self.delete(key) {
                removed += 1;
            }
        }
        removed
    }

    /// Number of stored values, including logically expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Iterate raw entries as `(key, value, expire_at_ms)` without evicting anything.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &V, Option<u64>)> {
        self.values
            .iter()
            .map(move |(k, v)| (k, v, self.expiries.get(k).copied()))
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.expiries.clear();
    }

    fn is_expired(&self, key: &str) -> bool {
        self.expiries
            .get(key)
            .is_some_and(|&at| at <= self.now())
    }

    fn now(&self) -> u64 {
        self.clock.now_unix_ms()
    }
}

impl<V: Clone> ExpiringCache<V> {
    /// New cache holding every key of `self` plus the keys only present in `other`.
    ///
    /// `self` wins on conflict. Values and expiries are merged independently.
    pub fn union(&self, other: &ExpiringCache<V>) -> ExpiringCache<V> {
        let mut values = self.values.clone();
        for (k, v) in &other.values {
            values.entry(k.clone()).or_insert_with(|| v.clone());
        }

        let mut expiries = self.expiries.clone();
        for (k, at) in &other.expiries {
            expiries.entry(k.clone()).or_insert(*at);
        }

        ExpiringCache { name: self.name.clone(), values, expiries, clock: self.clock.clone() }
    }

    /// New cache holding the keys of `self` that do not appear among `other`'s values.
    ///
    /// Only key presence in `other` matters, not the stored value.
    pub fn difference(&self, other: &ExpiringCache<V>) -> ExpiringCache<V> {
        let values = self
            .values
            .iter()
            .filter(|(k, _)| !other.values.contains_key(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let expiries = self
            .expiries
            .iter()
            .filter(|(k, _)| !other.values.contains_key(*k))
            .map(|(k, at)| (k.clone(), *at))
            .collect();

        ExpiringCache { name: self.name.clone(), values, expiries, clock: self.clock.clone() }
    }
}

impl<V: fmt::Debug> fmt::Debug for ExpiringCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("name", &self.name)
            .field("values", &self.values)
            .field("expiries", &self.expiries)
            .finish()
    }
}
