//! HTTP response caching: canonical key derivation, cacheability/TTL
//! policy, and the in-memory and Redis-backed stores that share the
//! [`ResponseCache`] contract.

pub mod key;
pub mod memory;
pub mod model;
pub mod policy;
pub mod redis_backend;
pub mod traits;

pub use memory::MemoryCache;
pub use model::CachedResponse;
pub use redis_backend::RedisCache;
pub use traits::{ResponseCache, Result};

/// Header values surfaced on every response pass for observability.
pub mod cache_status {
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const BYPASS: &str = "bypass";
    pub const STORED: &str = "stored";
    pub const CONDITIONAL_HIT: &str = "conditional-hit";
}

pub const CACHE_STATUS_HEADER: &str = "cache-status";
pub const CACHE_KEY_HEADER: &str = "x-cache-key";
