use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

/// Capacity-bounded cache with a per-entry time-to-live. Used for upstream listings, where a
/// stale entry should eventually be forgotten even under constant traffic.
pub struct TtlCache<V: Clone> {
    inner: Mutex<LruCache<String, (V, Instant)>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut guard = self.inner.lock().unwrap();
        match guard.get(key) {
            Some((value, inserted_at)) if inserted_at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                guard.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, value: V) {
        self.inner.lock().unwrap().put(key, (value, Instant::now()));
    }

    pub fn invalidate(&self) {
        self.inner.lock().unwrap().clear();
    }
}

/// Capacity-bounded, TTL-less cache that also remembers negative lookups (`None`), so a provider
/// miss is never retried within the process lifetime. `get` distinguishes "not cached at all"
/// (`None`) from "cached as a miss" (`Some(None)`).
pub struct NegativeCache<V: Clone> {
    inner: Mutex<LruCache<String, Option<V>>>,
}

impl<V: Clone> NegativeCache<V> {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn get(&self, key: &str) -> Option<Option<V>> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    pub fn insert(&self, key: String, value: Option<V>) {
        self.inner.lock().unwrap().put(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_cache_expires_entries() {
        let cache = TtlCache::new(4, Duration::from_millis(10));
        cache.insert("torrents".to_string(), vec![1, 2, 3]);
        assert_eq!(cache.get("torrents"), Some(vec![1, 2, 3]));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("torrents"), None);
    }

    #[test]
    fn ttl_cache_invalidate_clears_everything() {
        let cache = TtlCache::new(4, Duration::from_secs(60));
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.invalidate();
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn negative_cache_remembers_misses() {
        let cache: NegativeCache<String> = NegativeCache::new(4);
        assert_eq!(cache.get("tmdb:movie:nope:"), None);
        cache.insert("tmdb:movie:nope:".to_string(), None);
        assert_eq!(cache.get("tmdb:movie:nope:"), Some(None));
    }
}
