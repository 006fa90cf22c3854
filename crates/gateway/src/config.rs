use std::time::Duration;

/// One upstream provider's routing and pool profile.
#[derive(Clone, Debug)]
pub struct ProviderProfile {
    pub base_url: String,
    /// Path prefixes this profile allows; a request path must start with
    /// one of these.
    pub allowed_endpoints: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub request_timeout: Duration,
    pub response_header_timeout: Duration,
    pub idle_connection_timeout: Duration,
    pub flush_interval: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for ProviderProfile {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            allowed_endpoints: vec!["/v1/".to_string()],
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            request_timeout: Duration::from_secs(60),
            response_header_timeout: Duration::from_secs(15),
            idle_connection_timeout: Duration::from_secs(90),
            flush_interval: Duration::from_millis(100),
            pool_max_idle_per_host: 32,
        }
    }
}

impl ProviderProfile {
    pub fn allows_path(&self, path: &str) -> bool {
        self.allowed_endpoints.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn allows_method(&self, method: &str) -> bool {
        self.allowed_methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }
}

/// Tuning for the request pipeline beyond per-provider routing.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub enforce_project_active: bool,
    pub http_cache_enabled: bool,
    /// Beyond this many captured bytes, streaming responses stop
    /// buffering for cache storage (the client still receives every byte).
    pub max_capture_bytes: usize,
    pub default_cache_ttl: Duration,
    pub max_cache_object_bytes: usize,
    pub upstream_retry_attempts: u32,
    pub upstream_retry_backoff_base: Duration,
    pub event_bus_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enforce_project_active: true,
            http_cache_enabled: true,
            max_capture_bytes: 64 * 1024,
            default_cache_ttl: Duration::from_secs(60),
            max_cache_object_bytes: 2 * 1024 * 1024,
            upstream_retry_attempts: 2,
            upstream_retry_backoff_base: Duration::from_millis(100),
            event_bus_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_prefix_matching() {
        let profile = ProviderProfile::default();
        assert!(profile.allows_path("/v1/chat/completions"));
        assert!(!profile.allows_path("/v2/chat"));
    }

    #[test]
    fn method_matching_is_case_insensitive() {
        let profile = ProviderProfile::default();
        assert!(profile.allows_method("get"));
        assert!(!profile.allows_method("DELETE"));
    }
}
