//! Shared durable cache backend: entries serialized as JSON, stored with a
//! server-side TTL under a configured key namespace, unaffected by process
//! restarts.

use std::time::Duration;

use async_trait::async_trait;
use llmproxy_core::StoreError;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::model::CachedResponse;
use crate::traits::{ResponseCache, Result};

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisCache {
    pub async fn connect(redis_url: &str, namespace: impl Into<String>) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            namespace: namespace.into(),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{key}", self.namespace)
    }

    fn to_store_error(err: redis::RedisError) -> StoreError {
        StoreError::transient(err)
    }
}

#[async_trait]
impl ResponseCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = conn
            .get(self.namespaced(key))
            .await
            .map_err(Self::to_store_error)?;
        match raw {
            Some(bytes) => {
                let entry: CachedResponse = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Internal(format!("corrupt cache entry: {e}")))?;
                if entry.is_expired(chrono::Utc::now()) {
                    Ok(None)
                } else {
                    Ok(Some(entry))
                }
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: CachedResponse, ttl: Duration) -> Result<()> {
        let bytes = serde_json::to_vec(&entry)
            .map_err(|e| StoreError::Internal(format!("cache serialize error: {e}")))?;
        let mut conn = self.conn.clone();
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(self.namespaced(key), bytes, ttl_secs)
            .await
            .map_err(Self::to_store_error)?;
        Ok(())
    }

    async fn purge_exact(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.namespaced(key))
            .await
            .map_err(Self::to_store_error)?;
        Ok(())
    }

    async fn purge_prefix(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.namespaced(prefix));
        let mut cursor: u64 = 0;
        let mut removed = 0u64;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(Self::to_store_error)?;
            if !keys.is_empty() {
                removed += keys.len() as u64;
                conn.del::<_, ()>(keys).await.map_err(Self::to_store_error)?;
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(removed)
    }
}
