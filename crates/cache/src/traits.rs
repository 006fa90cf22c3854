use std::time::Duration;

use async_trait::async_trait;
use llmproxy_core::StoreError;

use crate::model::CachedResponse;

pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Returns `None` both on a true miss and when the stored entry has
    /// already expired.
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>>;
    async fn set(&self, key: &str, entry: CachedResponse, ttl: Duration) -> Result<()>;
    async fn purge_exact(&self, key: &str) -> Result<()>;
    /// Returns the number of entries removed.
    async fn purge_prefix(&self, prefix: &str) -> Result<u64>;
}
