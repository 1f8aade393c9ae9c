//! Time-bounded cache used for per-user expense lists on the server and for
//! the client-side `CachedGastos` wrapper. The TTL is injected and may be
//! changed at runtime when the config is saved.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Snapshot taken before loading a value. An `invalidate` or `clear` after
/// the snapshot makes `insert_if_current` drop the loaded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    epoch: u64,
    key: u64,
}

struct Entry<V> {
    stored_at: Instant,
    value: V,
}

pub struct TtlCache<K, V> {
    entries: DashMap<K, Entry<V>>,
    generations: DashMap<K, u64>,
    epoch: AtomicU64,
    ttl_ms: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            generations: DashMap::new(),
            epoch: AtomicU64::new(0),
            ttl_ms: AtomicU64::new(ttl.as_millis() as u64),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms.load(Ordering::Relaxed))
    }

    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_ms.store(ttl.as_millis() as u64, Ordering::Relaxed);
    }

    /// Fresh value only.
    pub fn get(&self, key: &K) -> Option<V> {
        let ttl = self.ttl();
        self.entries
            .get(key)
            .filter(|e| e.stored_at.elapsed() < ttl)
            .map(|e| e.value.clone())
    }

    /// Value regardless of age, used as a fallback when a refresh fails.
    pub fn get_stale(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|e| e.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(
            key,
            Entry {
                stored_at: Instant::now(),
                value,
            },
        );
    }

    pub fn generation(&self, key: &K) -> Generation {
        Generation {
            epoch: self.epoch.load(Ordering::SeqCst),
            key: self.generations.get(key).map(|g| *g).unwrap_or(0),
        }
    }

    /// Stores `value` unless `key` was invalidated, or the cache cleared,
    /// since `seen` was taken. Returns whether it was stored.
    pub fn insert_if_current(&self, key: K, value: V, seen: Generation) -> bool {
        {
            // the generation lock is held across the insert so a concurrent
            // invalidate either lands before the check or after the insert
            let current = self.generations.entry(key.clone()).or_insert(0);
            if *current != seen.key || self.epoch.load(Ordering::SeqCst) != seen.epoch {
                return false;
            }
            self.insert(key.clone(), value);
        }
        if self.epoch.load(Ordering::SeqCst) != seen.epoch {
            self.entries.remove(&key);
            return false;
        }
        true
    }

    pub fn invalidate(&self, key: &K) {
        *self.generations.entry(key.clone()).or_insert(0) += 1;
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_and_stale() {
        let cache: TtlCache<i64, Vec<i32>> = TtlCache::new(Duration::from_secs(300));
        cache.insert(1, vec![1, 2]);
        assert_eq!(cache.get(&1), Some(vec![1, 2]));

        cache.set_ttl(Duration::ZERO);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get_stale(&1), Some(vec![1, 2]));
    }

    #[test]
    fn test_invalidate() {
        let cache: TtlCache<i64, &str> = TtlCache::new(Duration::from_secs(60));
        cache.insert(1, "a");
        cache.insert(2, "b");
        cache.invalidate(&1);
        assert!(cache.get(&1).is_none());
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_load_started_before_invalidate_is_not_cached() {
        let cache: TtlCache<i64, Vec<i32>> = TtlCache::new(Duration::from_secs(60));
        let before = cache.generation(&1);
        // a write lands while the list is being loaded
        cache.invalidate(&1);
        assert!(!cache.insert_if_current(1, vec![1], before));
        assert_eq!(cache.get(&1), None);

        let fresh = cache.generation(&1);
        assert!(cache.insert_if_current(1, vec![1, 2], fresh));
        assert_eq!(cache.get(&1), Some(vec![1, 2]));

        // other keys are unaffected by an invalidate
        let other = cache.generation(&2);
        cache.invalidate(&1);
        assert!(cache.insert_if_current(2, vec![9], other));

        let before_clear = cache.generation(&3);
        cache.clear();
        assert!(!cache.insert_if_current(3, vec![3], before_clear));
        assert!(cache.is_empty());
    }
}
