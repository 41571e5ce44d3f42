//! In-memory caches backed by moka.

use std::time::{Duration, Instant};

use moka::{Expiry, sync::Cache};

/// Thread-safe in-memory cache with configurable capacity.
///
/// Used for parsed workflows (`MemCache<String, Arc<Workflow>>`) so a worker
/// does not re-validate the same definition for every job.
#[derive(Clone)]
pub struct MemCache<K, V> {
    entries: Cache<K, V>,
}

impl<K, V> MemCache<K, V>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Allocate a new [`MemCache`].
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Cache::new(capacity as u64),
        }
    }

    pub fn set(
        &self,
        key: K,
        value: V,
    ) {
        self.entries.insert(key, value);
    }

    pub fn get(
        &self,
        key: &K,
    ) -> Option<V> {
        self.entries.get(key)
    }

    pub fn remove(
        &self,
        key: &K,
    ) {
        self.entries.remove(key);
    }
}

/// Per-entry expiry: the TTL travels with the value.
struct EntryTtl;

impl<K, V> Expiry<K, (V, Duration)> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &K,
        value: &(V, Duration),
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.1)
    }

    fn expire_after_update(
        &self,
        _key: &K,
        value: &(V, Duration),
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.1)
    }
}

/// Cache where every entry carries its own time-to-live.
///
/// Backs the in-memory status store, where each record expires on its own
/// schedule like a `SETEX` key would.
#[derive(Clone)]
pub struct TtlCache<K, V> {
    entries: Cache<K, (V, Duration)>,
}

impl<K, V> TtlCache<K, V>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity as u64).expire_after(EntryTtl).build(),
        }
    }

    pub fn set(
        &self,
        key: K,
        value: V,
        ttl: Duration,
    ) {
        self.entries.insert(key, (value, ttl));
    }

    pub fn get(
        &self,
        key: &K,
    ) -> Option<V> {
        self.entries.get(key).map(|(v, _)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_cache() {
        let cache = MemCache::new(16);
        cache.set("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        cache.remove(&"a".to_string());
        assert_eq!(cache.get(&"a".to_string()), None);
    }

    #[test]
    fn test_ttl_cache_expires() {
        let cache = TtlCache::new(16);
        cache.set("short", 1, Duration::from_millis(20));
        cache.set("long", 2, Duration::from_secs(60));
        assert_eq!(cache.get(&"short"), Some(1));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&"short"), None);
        assert_eq!(cache.get(&"long"), Some(2));
    }
}
