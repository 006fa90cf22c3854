//! In-process cache backend: a `moka` concurrent map keyed by the
//! canonical key string, bounded by a process-wide byte budget and expiring
//! per-entry. `moka` evicts lazily on read and via its own background
//! maintenance, matching the lazy-check-plus-sweeper contract.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use moka::future::Cache;
use moka::Expiry;

use crate::model::CachedResponse;
use crate::traits::{ResponseCache, Result};

#[derive(Clone)]
struct StoredEntry {
    response: CachedResponse,
    ttl: Duration,
}

struct TtlExpiry;

impl Expiry<String, StoredEntry> for TtlExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

pub struct MemoryCache {
    inner: Cache<String, StoredEntry>,
}

impl MemoryCache {
    /// `max_bytes` bounds the sum of cached body sizes, not entry count.
    pub fn new(max_bytes: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|_key: &String, value: &StoredEntry| -> u32 {
                value.response.byte_size().max(1) as u32
            })
            .expire_after(TtlExpiry)
            .build();
        Self { inner }
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>> {
        Ok(self.inner.get(key).await.and_then(|stored| {
            if stored.response.is_expired(Utc::now()) {
                None
            } else {
                Some(stored.response)
            }
        }))
    }

    async fn set(&self, key: &str, entry: CachedResponse, ttl: Duration) -> Result<()> {
        self.inner
            .insert(key.to_string(), StoredEntry { response: entry, ttl })
            .await;
        Ok(())
    }

    async fn purge_exact(&self, key: &str) -> Result<()> {
        self.inner.invalidate(key).await;
        Ok(())
    }

    async fn purge_prefix(&self, prefix: &str) -> Result<u64> {
        let matching: Vec<String> = self
            .inner
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| (*k).clone())
            .collect();
        let count = matching.len() as u64;
        for key in matching {
            self.inner.invalidate(&key).await;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::canonical_key;

    fn entry(ttl_secs: i64) -> CachedResponse {
        CachedResponse {
            status: 200,
            headers: vec![],
            body: b"hello".to_vec(),
            etag: Some("\"abc\"".into()),
            last_modified: None,
            expires_at: Utc::now() + chrono::Duration::seconds(ttl_secs),
        }
    }

    #[tokio::test]
    async fn hit_then_expiry() {
        let cache = MemoryCache::new(1024 * 1024);
        let key = canonical_key("GET", "/v1/models", "", &[], None);
        cache.set(&key, entry(-1), Duration::from_secs(1)).await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_none(), "already-expired entry must miss");
    }

    #[tokio::test]
    async fn fresh_entry_hits() {
        let cache = MemoryCache::new(1024 * 1024);
        let key = canonical_key("GET", "/v1/models", "", &[], None);
        cache.set(&key, entry(60), Duration::from_secs(60)).await.unwrap();
        assert!(cache.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_prefix_removes_all_query_variants() {
        let cache = MemoryCache::new(1024 * 1024);
        let k1 = canonical_key("GET", "/v1/models", "a=1", &[], None);
        let k2 = canonical_key("GET", "/v1/models", "a=2", &[], None);
        let other = canonical_key("GET", "/v1/chat", "", &[], None);
        cache.set(&k1, entry(60), Duration::from_secs(60)).await.unwrap();
        cache.set(&k2, entry(60), Duration::from_secs(60)).await.unwrap();
        cache.set(&other, entry(60), Duration::from_secs(60)).await.unwrap();

        let removed = cache.purge_prefix("GET:/v1/models").await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get(&other).await.unwrap().is_some());
    }
}
