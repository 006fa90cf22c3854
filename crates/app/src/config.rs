//! Environment-driven configuration, per the keys enumerated in the
//! external-interfaces section of the operator guide. Unknown keys are
//! ignored, not rejected; recognized keys fall back to sane defaults so the
//! binary runs unconfigured against an in-memory store for local testing.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbDriver {
    Sqlite,
    Postgres,
}

impl std::str::FromStr for DbDriver {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(DbDriver::Sqlite),
            "postgres" | "postgresql" => Ok(DbDriver::Postgres),
            other => Err(anyhow::anyhow!("unsupported DB_DRIVER: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    InMemory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub management_token: Option<String>,
    pub db_driver: DbDriver,
    pub database_url: String,
    pub database_pool_size: u32,
    pub http_cache_enabled: bool,
    pub http_cache_backend: CacheBackend,
    pub redis_cache_url: Option<String>,
    pub redis_cache_key_prefix: String,
    pub http_cache_max_object_bytes: usize,
    pub http_cache_default_ttl: Duration,
    pub observability_enabled: bool,
    pub observability_buffer_size: usize,
    pub audit_log_path: String,
    pub audit_db_enabled: bool,
    pub enforce_project_active: bool,
    pub cache_stats_buffer_size: usize,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    env_var(key).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes")).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let db_driver: DbDriver = env_var("DB_DRIVER").unwrap_or_else(|| "sqlite".to_string()).parse()?;
        let database_url = env_var("DATABASE_URL")
            .or_else(|| env_var("DATABASE_PATH").map(|p| format!("sqlite://{p}")))
            .unwrap_or_else(|| "sqlite::memory:".to_string());
        let http_cache_backend = match env_var("HTTP_CACHE_BACKEND").as_deref() {
            Some("redis") => CacheBackend::Redis,
            _ => CacheBackend::InMemory,
        };

        Ok(Self {
            listen_addr: env_var("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            management_token: env_var("MANAGEMENT_TOKEN"),
            db_driver,
            database_url,
            database_pool_size: env_parsed("DATABASE_POOL_SIZE", 10),
            http_cache_enabled: env_flag("HTTP_CACHE_ENABLED", true),
            http_cache_backend,
            redis_cache_url: env_var("REDIS_CACHE_URL"),
            redis_cache_key_prefix: env_var("REDIS_CACHE_KEY_PREFIX").unwrap_or_else(|| "llmproxy:cache:".to_string()),
            http_cache_max_object_bytes: env_parsed("HTTP_CACHE_MAX_OBJECT_BYTES", 2 * 1024 * 1024),
            http_cache_default_ttl: Duration::from_secs(env_parsed("HTTP_CACHE_DEFAULT_TTL", 60)),
            observability_enabled: env_flag("OBSERVABILITY_ENABLED", true),
            observability_buffer_size: env_parsed("OBSERVABILITY_BUFFER_SIZE", 1024),
            audit_log_path: env_var("AUDIT_LOG_PATH").unwrap_or_else(|| "./audit.log".to_string()),
            audit_db_enabled: env_flag("AUDIT_DB_ENABLED", false),
            enforce_project_active: env_flag("LLM_PROXY_ENFORCE_PROJECT_ACTIVE", true),
            cache_stats_buffer_size: env_parsed("CACHE_STATS_BUFFER_SIZE", 10_000),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_driver_parses_case_insensitively() {
        assert_eq!("SQLite".parse::<DbDriver>().unwrap(), DbDriver::Sqlite);
        assert_eq!("postgres".parse::<DbDriver>().unwrap(), DbDriver::Postgres);
        assert!("mysql".parse::<DbDriver>().is_err());
    }
}
