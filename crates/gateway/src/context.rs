use std::time::Instant;

use http::HeaderMap;
use llmproxy_core::ids::{correlation_id_from_headers, request_id_from_headers};

/// Stage-1 request context: attached once, read by every later stage and
/// by the final audit/event emission.
#[derive(Clone)]
pub struct RequestCtx {
    pub request_id: String,
    pub correlation_id: String,
    pub method: String,
    pub path: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub started_at: Instant,
}

impl RequestCtx {
    pub fn new(method: &str, path: &str, headers: &HeaderMap, client_ip: Option<String>) -> Self {
        let request_id = request_id_from_headers(headers);
        let correlation_id = correlation_id_from_headers(headers, &request_id);
        let user_agent = headers
            .get(http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        tracing::info!(
            request_id = %request_id,
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            client_ip = client_ip.as_deref().unwrap_or(""),
            user_agent = user_agent.as_deref().unwrap_or(""),
            "proxy request received"
        );

        Self {
            request_id,
            correlation_id,
            method: method.to_string(),
            path: path.to_string(),
            client_ip,
            user_agent,
            started_at: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}
