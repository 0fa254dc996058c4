//! TTL-expiring set of opaque keys with a background sweep.
//!
//! Backs single-use token tracking: a token id is `put` at issuance and
//! `consume`d exactly once at verification. The sweeper reclaims entries
//! whose holder never came back.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Minimum sweep interval; anything shorter just burns CPU.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct KeyCache {
    items: RwLock<HashMap<String, Instant>>,
    ttl: Duration,
    gc: Duration,
}

impl KeyCache {
    /// Create a cache whose entries live for `ttl` and are swept every `gc`
    /// (clamped to a minimum of one second).
    pub fn new(ttl: Duration, gc: Duration) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            ttl,
            gc: gc.max(MIN_SWEEP_INTERVAL),
        }
    }

    /// Record `key`, expiring `ttl` from now. Re-inserting refreshes the expiry.
    pub fn put(&self, key: &str) {
        let mut items = self.items.write().expect("key cache lock poisoned");
        items.insert(key.to_string(), Instant::now() + self.ttl);
    }

    /// True iff `key` is present and its expiry is strictly in the future.
    pub fn has(&self, key: &str) -> bool {
        let items = self.items.read().expect("key cache lock poisoned");
        items.get(key).is_some_and(|expiry| *expiry > Instant::now())
    }

    /// Remove `key`. Idempotent.
    pub fn del(&self, key: &str) {
        let mut items = self.items.write().expect("key cache lock poisoned");
        items.remove(key);
    }

    /// Atomically remove `key` if it is present and unexpired, returning
    /// whether it was. Of any number of concurrent callers for the same key,
    /// exactly one sees true. An expired entry is left for the sweeper.
    pub fn consume(&self, key: &str) -> bool {
        let mut items = self.items.write().expect("key cache lock poisoned");
        match items.get(key) {
            Some(expiry) if *expiry > Instant::now() => {
                items.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Spawn a background task that periodically removes expired entries.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(cache.gc).await;

                let swept = {
                    let mut items = cache.items.write().expect("key cache lock poisoned");
                    let before = items.len();
                    let now = Instant::now();
                    items.retain(|_, expiry| *expiry > now);
                    before - items.len()
                };
                if swept > 0 {
                    tracing::debug!(swept, "key cache sweep");
                }
            }
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.items.read().expect("key cache lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn has_within_ttl_only() {
        let cache = KeyCache::new(Duration::from_millis(40), Duration::from_secs(1));
        cache.put("k");
        assert!(cache.has("k"));
        thread::sleep(Duration::from_millis(60));
        assert!(!cache.has("k"));
    }

    #[test]
    fn del_is_idempotent() {
        let cache = KeyCache::new(Duration::from_secs(10), Duration::from_secs(1));
        cache.put("k");
        cache.del("k");
        cache.del("k");
        assert!(!cache.has("k"));
    }

    #[test]
    fn consume_succeeds_exactly_once() {
        let cache = Arc::new(KeyCache::new(Duration::from_secs(10), Duration::from_secs(1)));
        cache.put("k");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.consume("k"))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1);
        assert!(!cache.has("k"));
    }

    #[test]
    fn consume_rejects_expired_entries() {
        let cache = KeyCache::new(Duration::from_millis(20), Duration::from_secs(1));
        cache.put("k");
        thread::sleep(Duration::from_millis(40));
        assert!(!cache.consume("k"));
    }

    #[tokio::test]
    async fn sweeper_removes_expired_entries() {
        let cache = Arc::new(KeyCache::new(
            Duration::from_millis(20),
            Duration::from_secs(1),
        ));
        cache.put("a");
        cache.put("b");
        let sweeper = cache.spawn_sweeper();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(cache.len(), 0);
        sweeper.abort();
    }

    #[test]
    fn sweep_interval_is_clamped() {
        let cache = KeyCache::new(Duration::from_secs(10), Duration::from_millis(1));
        assert_eq!(cache.gc, Duration::from_secs(1));
    }
}
