use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Entry stored in the local DashMap with an expiry timestamp.
#[derive(Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Two-tier advisory cache: in-memory DashMap (tier 1) with an
/// optional Redis tier behind it. Holds effective-model lists, probe
/// results and the secret-filtered connection snapshots fanned out to
/// replicas. The connection registry is the source of truth; nothing
/// here is authoritative.
///
/// Local entries honour TTLs and are evicted lazily on read; a
/// background sweep can be triggered with `evict_expired()`. Without a
/// Redis URL the cache runs single-tier.
#[derive(Clone)]
pub struct ReplicaCache {
    local: Arc<DashMap<String, CacheEntry>>,
    redis: Option<ConnectionManager>,
}

impl ReplicaCache {
    pub fn new(redis: Option<ConnectionManager>) -> Self {
        Self {
            local: Arc::new(DashMap::new()),
            redis,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        // tier 1: in-memory (with TTL check)
        if let Some(entry) = self.local.get(key) {
            if Instant::now() < entry.expires_at {
                return serde_json::from_str(&entry.value).ok();
            }
            // expired, drop the ref before removing
            drop(entry);
            self.local.remove(key);
        }

        // tier 2: redis
        let mut conn = self.redis.clone()?;
        if let Ok(Some(v)) = conn.get::<_, Option<String>>(key).await {
            // Re-use the Redis TTL for the local entry, defaulting to
            // 60s when it cannot be queried.
            let ttl_secs: i64 = conn.ttl(key).await.unwrap_or(60);
            let ttl = if ttl_secs > 0 {
                Duration::from_secs(ttl_secs as u64)
            } else {
                Duration::from_secs(60)
            };
            self.local.insert(
                key.to_string(),
                CacheEntry {
                    value: v.clone(),
                    expires_at: Instant::now() + ttl,
                },
            );
            return serde_json::from_str(&v).ok();
        }

        None
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> anyhow::Result<()> {
        let json = serde_json::to_string(value)?;
        self.local.insert(
            key.to_string(),
            CacheEntry {
                value: json.clone(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );

        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            conn.set_ex::<_, _, ()>(key, json, ttl_secs).await?;
        }
        Ok(())
    }

    /// Drop a key from both tiers. Used after connection edits so a
    /// stale effective-models list is never served.
    pub async fn invalidate(&self, key: &str) {
        self.local.remove(key);
        if let Some(conn) = &self.redis {
            let mut conn = conn.clone();
            if let Err(e) = conn.del::<_, ()>(key).await {
                tracing::warn!("cache invalidation for '{}' failed in redis: {}", key, e);
            }
        }
    }

    /// Remove all locally-expired entries. Call periodically from a
    /// background task to bound memory usage.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.local.len();
        self.local.retain(|_, entry| entry.expires_at > now);
        before - self.local.len()
    }

    /// Current number of entries in the local cache (for diagnostics).
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_tier_set_get_invalidate() {
        let cache = ReplicaCache::new(None);
        cache.set("models:openai", &vec!["gpt-a", "gpt-b"], 60).await.unwrap();
        let got: Option<Vec<String>> = cache.get("models:openai").await;
        assert_eq!(got, Some(vec!["gpt-a".to_string(), "gpt-b".to_string()]));

        cache.invalidate("models:openai").await;
        let got: Option<Vec<String>> = cache.get("models:openai").await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_evicted() {
        let cache = ReplicaCache::new(None);
        cache.set("k", &1u32, 0).await.unwrap();
        // TTL of zero expires immediately.
        let got: Option<u32> = cache.get("k").await;
        assert!(got.is_none());
        assert_eq!(cache.evict_expired(), 0);
        assert_eq!(cache.local_len(), 0);
    }
}
