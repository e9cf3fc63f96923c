//! Keyed, TTL-bounded memoization with an update latency limit.
//!
//! After `delete(key)`, values computed for that key during the ULL window
//! are returned but not stored, so a read that raced the write cannot put
//! stale data back in the cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

struct Entry<V> {
    value: V,
    expires: Instant,
}

struct Slots<V> {
    entries: HashMap<String, Entry<V>>,
    quiet_until: HashMap<String, Instant>,
}

pub struct Cache<V> {
    name: &'static str,
    ttl: Duration,
    ull: Duration,
    slots: Mutex<Slots<V>>,
}

impl<V: Clone> Cache<V> {
    pub fn new(name: &'static str, ttl_seconds: f64, ull_seconds: f64) -> Self {
        Self {
            name,
            ttl: Duration::from_secs_f64(ttl_seconds),
            ull: Duration::from_secs_f64(ull_seconds),
            slots: Mutex::new(Slots {
                entries: HashMap::new(),
                quiet_until: HashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, Slots<V>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn encode_key<K: Serialize + ?Sized>(&self, key: &K) -> Option<String> {
        match serde_json::to_string(key) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                warn!(cache = self.name, error = %e, "Unencodable cache key; bypassing cache");
                None
            }
        }
    }

    /// Returns the fresh cached value for `key`, if any.
    pub fn get<K: Serialize + ?Sized>(&self, key: &K) -> Option<V> {
        let key = self.encode_key(key)?;
        let slots = self.slots();
        slots
            .entries
            .get(&key)
            .filter(|entry| entry.expires > Instant::now())
            .map(|entry| entry.value.clone())
    }

    /// Stores `value` unless the key is inside its ULL window.
    pub fn set<K: Serialize + ?Sized>(&self, key: &K, value: V) {
        let Some(key) = self.encode_key(key) else {
            return;
        };
        let now = Instant::now();
        let mut slots = self.slots();
        if let Some(until) = slots.quiet_until.get(&key).copied() {
            if until > now {
                debug!(cache = self.name, key = %key, "Within update latency limit; not storing");
                return;
            }
            slots.quiet_until.remove(&key);
        }
        slots.entries.insert(
            key,
            Entry {
                value,
                expires: now + self.ttl,
            },
        );
    }

    /// Gets the cached value, or computes, stores and returns it.
    /// Errors from `compute` are returned and nothing is stored.
    pub async fn get_or<K, F, Fut, E>(&self, key: &K, compute: F) -> Result<V, E>
    where
        K: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = compute().await?;
        self.set(key, value.clone());
        Ok(value)
    }

    /// Evicts `key` and opens its ULL window.
    pub fn delete<K: Serialize + ?Sized>(&self, key: &K) {
        let Some(key) = self.encode_key(key) else {
            return;
        };
        let now = Instant::now();
        let mut slots = self.slots();
        slots.entries.remove(&key);
        if !self.ull.is_zero() {
            slots.quiet_until.retain(|_, until| *until > now);
            slots.quiet_until.insert(key, now + self.ull);
        }
    }

    pub fn clear(&self) {
        let mut slots = self.slots();
        slots.entries.clear();
        slots.quiet_until.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[tokio::test]
    async fn computes_once_while_fresh() {
        let cache: Cache<u32> = Cache::new("test", 60.0, 0.0);
        let mut calls = 0;

        for _ in 0..3 {
            let value = cache
                .get_or("k", || {
                    calls += 1;
                    async { Ok::<_, Infallible>(7) }
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache: Cache<u32> = Cache::new("test", 60.0, 0.0);
        let failed = cache.get_or("k", || async { Err::<u32, _>("boom") }).await;
        assert!(failed.is_err());
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn composite_keys_are_distinct() {
        let cache: Cache<&str> = Cache::new("test", 60.0, 0.0);
        cache.set(&["a", "b"], "ab");
        cache.set(&["a:b"], "joined");
        assert_eq!(cache.get(&["a", "b"]), Some("ab"));
        assert_eq!(cache.get(&["a:b"]), Some("joined"));
    }

    #[test]
    fn delete_suppresses_stores_within_ull() {
        let cache: Cache<u32> = Cache::new("test", 60.0, 30.0);
        cache.set("k", 1);
        cache.delete("k");
        cache.set("k", 2);
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.get("other"), None);
    }

    #[tokio::test]
    async fn stores_resume_after_ull() {
        let cache: Cache<u32> = Cache::new("test", 60.0, 0.01);
        cache.delete("k");
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.set("k", 2);
        assert_eq!(cache.get("k"), Some(2));
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache: Cache<u32> = Cache::new("test", 0.01, 0.0);
        cache.set("k", 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn clear_drops_everything() {
        let cache: Cache<u32> = Cache::new("test", 60.0, 0.0);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.clear();
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
    }
}
