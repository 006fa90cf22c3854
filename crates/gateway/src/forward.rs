//! Forwards a request to the upstream provider with per-operation timeouts
//! and a small bounded retry budget for transient upstream failures.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};

use crate::config::ProviderProfile;

const TRANSIENT_STATUSES: [u16; 3] = [502, 503, 504];
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn build_client(profile: &ProviderProfile) -> reqwest::Result<Client> {
    Client::builder()
        .pool_max_idle_per_host(profile.pool_max_idle_per_host)
        .pool_idle_timeout(profile.idle_connection_timeout)
        .connect_timeout(profile.response_header_timeout)
        .timeout(profile.request_timeout)
        .build()
}

pub fn strip_hop_by_hop(headers: &mut reqwest::header::HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream returned a non-transient error status {0}")]
    NonTransientStatus(StatusCode),
}

/// Sends the request to `profile.base_url` + `path`, substituting the
/// upstream credential for the client's bearer token. Retries at most
/// `retry_attempts` times, only on {502, 503, 504}, with exponential
/// backoff (`backoff_base * 2^attempt`). A response is returned as soon as
/// one is received, even if its status is in the transient set and
/// retries are exhausted — the caller decides what to do with a final
/// transient status.
pub async fn forward(
    client: &Client,
    profile: &ProviderProfile,
    method: Method,
    path_and_query: &str,
    mut headers: reqwest::header::HeaderMap,
    body: Bytes,
    upstream_credential: &SecretString,
    retry_attempts: u32,
    backoff_base: Duration,
) -> Result<reqwest::Response, ForwardError> {
    strip_hop_by_hop(&mut headers);
    let auth_value = format!("Bearer {}", upstream_credential.expose_secret());
    headers.insert(
        reqwest::header::AUTHORIZATION,
        auth_value.parse().map_err(|_| ForwardError::Transport("invalid credential".into()))?,
    );

    let url = format!("{}{}", profile.base_url.trim_end_matches('/'), path_and_query);

    let mut attempt = 0u32;
    loop {
        let response = client
            .request(method.clone(), &url)
            .headers(headers.clone())
            .body(body.clone())
            .send()
            .await
            .map_err(|e| ForwardError::Transport(e.to_string()))?;

        let status = response.status();
        let is_transient = TRANSIENT_STATUSES.contains(&status.as_u16());
        if !is_transient || attempt >= retry_attempts {
            return Ok(response);
        }

        attempt += 1;
        let backoff = backoff_base * 2u32.pow(attempt);
        tracing::warn!(status = %status, attempt, "transient upstream status; retrying after backoff");
        tokio::time::sleep(backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_hop_by_hop_headers() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("content-type", "application/json".parse().unwrap());
        strip_hop_by_hop(&mut headers);
        assert!(!headers.contains_key("connection"));
        assert!(headers.contains_key("content-type"));
    }
}
