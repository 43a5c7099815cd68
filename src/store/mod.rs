//! # Keyed Counter Store
//!
//! A small storage seam shared by the rate limiter: keys with TTLs, string
//! values, and an atomic increment. Guard logic never touches storage
//! directly, which keeps a single-process map and a distributed cache
//! interchangeable behind this trait.

pub mod rate_limit;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::time::Duration;

use crate::core::error::GuardResult;

/// Result of an increment: the post-increment count and when the key expires
#[derive(Debug, Clone, Copy)]
pub struct WindowCount {
    pub count: u64,
    pub reset_at: DateTime<Utc>,
}

/// Storage backend abstraction with TTL semantics
///
/// `increment` must be atomic per key: concurrent callers each observe a
/// distinct count. The TTL is set when a key is first created (or recreated
/// after expiry) and is not extended by later increments, which is exactly
/// the fixed-window behavior the rate limiter needs.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> GuardResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> GuardResult<()>;
    async fn increment(&self, key: &str, ttl: Duration) -> GuardResult<WindowCount>;
    async fn remove(&self, key: &str) -> GuardResult<()>;
}

#[derive(Debug, Clone)]
struct StoreEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Single-process in-memory store backed by a concurrent map
///
/// Expired entries are dropped lazily on access; `cleanup_expired` exists for
/// periodic maintenance so long-idle keys do not accumulate.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: DashMap<String, StoreEntry>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Drop every expired entry
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.data.retain(|_, entry| entry.expires_at > now);
    }

    fn ttl_to_chrono(ttl: Duration) -> ChronoDuration {
        ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(60))
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> GuardResult<Option<String>> {
        if let Some(entry) = self.data.get(key) {
            if entry.expires_at > Utc::now() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // either absent or expired; drop a stale entry on the way out
        self.data
            .remove_if(key, |_, entry| entry.expires_at <= Utc::now());
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> GuardResult<()> {
        self.data.insert(
            key.to_string(),
            StoreEntry {
                value: value.to_string(),
                expires_at: Utc::now() + Self::ttl_to_chrono(ttl),
            },
        );
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> GuardResult<WindowCount> {
        let now = Utc::now();
        let fresh_expiry = now + Self::ttl_to_chrono(ttl);

        let mut entry = self.data.entry(key.to_string()).or_insert(StoreEntry {
            value: "0".to_string(),
            expires_at: fresh_expiry,
        });

        if entry.expires_at <= now {
            // window elapsed: restart the counter and the TTL
            entry.value = "1".to_string();
            entry.expires_at = fresh_expiry;
        } else {
            let current: u64 = entry.value.parse().unwrap_or(0);
            entry.value = (current + 1).to_string();
        }

        let count = entry.value.parse().unwrap_or(1);
        let reset_at = entry.expires_at;
        Ok(WindowCount { count, reset_at })
    }

    async fn remove(&self, key: &str) -> GuardResult<()> {
        self.data.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = InMemoryStore::new();
        store
            .set("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_read_as_absent() {
        let store = InMemoryStore::new();
        store
            .set("k", "v", Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_counts_within_window() {
        let store = InMemoryStore::new();
        let a = store.increment("c", Duration::from_secs(60)).await.unwrap();
        let b = store.increment("c", Duration::from_secs(60)).await.unwrap();
        let c = store.increment("c", Duration::from_secs(60)).await.unwrap();
        assert_eq!(a.count, 1);
        assert_eq!(b.count, 2);
        assert_eq!(c.count, 3);
        // TTL is anchored at first touch, not extended by later increments
        assert_eq!(a.reset_at, c.reset_at);
    }

    #[tokio::test]
    async fn test_increment_restarts_after_expiry() {
        let store = InMemoryStore::new();
        store.increment("c", Duration::from_millis(5)).await.unwrap();
        store.increment("c", Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        let after = store.increment("c", Duration::from_millis(5)).await.unwrap();
        assert_eq!(after.count, 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = InMemoryStore::new();
        store.increment("c", Duration::from_secs(60)).await.unwrap();
        store.remove("c").await.unwrap();
        let fresh = store.increment("c", Duration::from_secs(60)).await.unwrap();
        assert_eq!(fresh.count, 1);
    }
}
