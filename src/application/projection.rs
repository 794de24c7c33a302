//! Typed, best-effort read-through projection over the [`Cache`] port.
//!
//! Every failure here is logged and swallowed: a cache problem only ever
//! costs an extra read from the backing store.
//!
//! Per-user views live under a generation token that every invalidation
//! replaces. A reader fetches the token before it reads the store, so a
//! value read before an invalidation can only be written under the old
//! token, where nobody looks any more.
//!
//! [`Cache`]: crate::domain::ports::Cache

use crate::domain::page::Page;
use crate::domain::ports::CacheRef;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

pub const STATS_VIEW: &str = "stats";

#[derive(Clone)]
pub struct Projection {
    cache: CacheRef,
    ttl: Duration,
    stats_ttl: Duration,
}

impl Projection {
    pub fn new(cache: CacheRef, ttl: Duration, stats_ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            stats_ttl,
        }
    }

    pub fn transaction_key(id: Uuid) -> String {
        format!("transaction:{}", id)
    }

    pub fn transactions_view(page: Page) -> String {
        format!("transactions:{}:{}", page.limit, page.offset)
    }

    pub fn accruals_view(page: Page) -> String {
        format!("accruals:{}:{}", page.limit, page.offset)
    }

    /// Prefix shared by every per-user view.
    pub fn user_prefix(user_id: &str) -> String {
        format!("user:{}:", user_id)
    }

    pub fn generation_key(user_id: &str) -> String {
        format!("generation:user:{}", user_id)
    }

    /// Key of `view` for `user_id` under the current generation. Call it
    /// before reading the store.
    pub async fn user_key(&self, user_id: &str, view: &str) -> String {
        format!(
            "{}{}:{}",
            Self::user_prefix(user_id),
            self.generation(user_id).await,
            view
        )
    }

    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.cache.get(key).await {
            Ok(hit) => hit?,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, falling through to store");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                debug!(key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "Dropping undecodable cache entry");
                self.delete(key).await;
                None
            }
        }
    }

    /// Caches an entity or list view.
    pub async fn write<T: Serialize>(&self, key: &str, value: &T) {
        self.put(key, value, self.ttl).await;
    }

    /// Caches an aggregate, which goes stale faster than entities.
    pub async fn write_stats<T: Serialize>(&self, key: &str, value: &T) {
        self.put(key, value, self.stats_ttl).await;
    }

    pub async fn invalidate_transaction(&self, id: Uuid) {
        self.delete(&Self::transaction_key(id)).await;
    }

    /// Drops every list, stats and history view belonging to `user_id`.
    ///
    /// The generation is replaced first so that readers still holding a
    /// value from before the change write it where it is never read.
    pub async fn invalidate_user(&self, user_id: &str) {
        let fresh = Uuid::new_v4().to_string();
        self.set_raw(&Self::generation_key(user_id), fresh.into_bytes(), self.ttl)
            .await;
        let prefix = Self::user_prefix(user_id);
        match self.cache.delete_prefix(&prefix).await {
            Ok(removed) => debug!(user_id, removed, "Invalidated user views"),
            Err(e) => warn!(user_id, error = %e, "Cache invalidation failed"),
        }
    }

    async fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Cache payload could not be encoded");
                return;
            }
        };
        self.set_raw(key, bytes, ttl).await;
    }

    async fn set_raw(&self, key: &str, bytes: Vec<u8>, ttl: Duration) {
        if let Err(e) = self.cache.set(key, bytes, ttl).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    async fn generation(&self, user_id: &str) -> String {
        let key = Self::generation_key(user_id);
        match self.cache.get(&key).await {
            Ok(Some(bytes)) => {
                if let Ok(generation) = String::from_utf8(bytes) {
                    return generation;
                }
            }
            Ok(None) => {}
            Err(e) => {
                // An unknown generation makes every lookup miss.
                warn!(key, error = %e, "Cache generation read failed");
                return Uuid::new_v4().to_string();
            }
        }
        let fresh = Uuid::new_v4().to_string();
        self.set_raw(&key, fresh.clone().into_bytes(), self.ttl).await;
        fresh
    }

    async fn delete(&self, key: &str) {
        if let Err(e) = self.cache.delete(key).await {
            warn!(key, error = %e, "Cache delete failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::InMemoryCache;
    use std::sync::Arc;

    fn projection(cache: &InMemoryCache) -> Projection {
        Projection::new(
            Arc::new(cache.clone()),
            Duration::from_secs(600),
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn test_key_layout() {
        let cache = InMemoryCache::new();
        let projection = projection(&cache);
        let page = Page::new(20, 40).unwrap();

        let key = projection
            .user_key("alice", &Projection::transactions_view(page))
            .await;
        assert!(key.starts_with("user:alice:"));
        assert!(key.ends_with(":transactions:20:40"));
        assert_eq!(
            projection.user_key("alice", STATS_VIEW).await,
            key.replace("transactions:20:40", "stats")
        );
        assert!(cache.contains(&Projection::generation_key("alice")).await);
    }

    #[tokio::test]
    async fn test_round_trip_and_user_invalidation() {
        let cache = InMemoryCache::new();
        let projection = projection(&cache);
        let key = projection.user_key("alice", STATS_VIEW).await;

        projection.write_stats(&key, &vec![1u32, 2, 3]).await;
        assert_eq!(projection.read::<Vec<u32>>(&key).await, Some(vec![1, 2, 3]));

        projection.invalidate_user("alice").await;
        assert_eq!(projection.read::<Vec<u32>>(&key).await, None);
        assert_ne!(projection.user_key("alice", STATS_VIEW).await, key);
    }

    #[tokio::test]
    async fn test_write_under_replaced_generation_is_never_read() {
        let cache = InMemoryCache::new();
        let projection = projection(&cache);
        let before = projection.user_key("alice", STATS_VIEW).await;

        projection.invalidate_user("alice").await;
        projection.write_stats(&before, &1u32).await;

        let current = projection.user_key("alice", STATS_VIEW).await;
        assert_eq!(projection.read::<u32>(&current).await, None);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let cache = InMemoryCache::new();
        let projection = projection(&cache);
        projection.write("k", &"not a number").await;

        assert_eq!(projection.read::<u64>("k").await, None);
        assert!(!cache.contains("k").await);
    }
}
