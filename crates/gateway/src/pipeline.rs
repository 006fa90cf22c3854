//! Request Pipeline (component D): the ordered stages every proxied call
//! passes through. Stages 1-5 can short-circuit with a client-facing error
//! before a single byte reaches the upstream provider; stages 6-11 run once
//! the request is known to be valid, allowed, and resolved against the
//! cache.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use llmproxy_audit::{Actor, AuditAction, AuditEventBuilder, AuditSink, Outcome};
use llmproxy_cache::{
    cache_status, key as cache_key, policy, CachedResponse, ResponseCache, CACHE_KEY_HEADER, CACHE_STATUS_HEADER,
};
use llmproxy_core::ApiError;
use llmproxy_eventbus::{EventBus, EventRecord};
use llmproxy_store::{ProjectStore, TokenStore};
use uuid::Uuid;

use crate::capture::CapturingStream;
use crate::context::RequestCtx;
use crate::forward;
use crate::state::AppState;
use crate::validator::obfuscate_token;

const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Entry point wired into the router as the proxy catch-all.
pub async fn proxy_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let ctx = RequestCtx::new(
        parts.method.as_str(),
        parts.uri.path(),
        &parts.headers,
        client_ip(&parts.headers),
    );

    let body_bytes = match to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
        Ok(b) => b,
        Err(_) => return with_request_id(ApiError::internal().into_response(), &ctx),
    };

    match run(state, &ctx, parts.method, parts.uri, parts.headers, body_bytes).await {
        Ok(resp) => with_request_id(resp, &ctx),
        Err(err) => with_request_id(err.into_response(), &ctx),
    }
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
}

fn with_request_id(mut resp: Response, ctx: &RequestCtx) -> Response {
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(|s| s.trim().to_string())
}

/// Pulls the request's values for a set of header names (as named by a
/// `Vary` list) so they can be folded into the cache key. A name the
/// request doesn't carry contributes nothing, matching `canonical_key`'s
/// treatment of an empty `vary_values` slice.
fn vary_values_from_headers(names: &[String], headers: &HeaderMap) -> Vec<(String, String)> {
    names
        .iter()
        .filter_map(|name| headers.get(name.as_str()).and_then(|v| v.to_str().ok()).map(|v| (name.clone(), v.to_string())))
        .collect()
}

async fn run(
    state: Arc<AppState>,
    ctx: &RequestCtx,
    method: Method,
    uri: http::Uri,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, ApiError> {
    // Stage 2: token extraction.
    let secret = bearer_token(&headers).ok_or_else(ApiError::missing_token)?;

    // Stage 3: token validation.
    let validated = state.validator.validate(&secret).await?;

    // Stage 4: project-active gate.
    if state.config.enforce_project_active {
        match state.projects.get_project_active(validated.project_id).await {
            Ok(true) => {}
            Ok(false) => {
                audit(
                    &state,
                    AuditAction::ProxyRequest,
                    Actor::Token(obfuscate_token(&secret)),
                    Outcome::Denied,
                    ctx,
                    Some(validated.project_id),
                    Some("project_inactive"),
                )
                .await;
                return Err(ApiError::project_inactive());
            }
            Err(err) => {
                audit(
                    &state,
                    AuditAction::ProxyRequest,
                    Actor::Token(obfuscate_token(&secret)),
                    Outcome::Error,
                    ctx,
                    Some(validated.project_id),
                    Some("project_lookup_failed"),
                )
                .await;
                tracing::error!(%err, "project active lookup failed");
                return Err(ApiError::service_unavailable());
            }
        }
    }

    // Stage 5: endpoint/method allowlist.
    let path = uri.path();
    if !state.provider.allows_path(path) {
        return Err(ApiError::endpoint_not_allowed());
    }
    if !state.provider.allows_method(method.as_str()) {
        return Err(ApiError::method_not_allowed());
    }

    let query = uri.query().unwrap_or("");
    let request_cc = headers
        .get(http::header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .map(policy::CacheControl::parse);
    let cache_opt_in = request_cc.as_ref().map(|cc| cc.public).unwrap_or(false);
    let cacheable_method = state.config.http_cache_enabled
        && policy::method_is_cacheable(method.as_str(), cache_opt_in);

    let body_hash = if body.is_empty() { None } else { Some(cache_key::hash_body(&body)) };
    let primary_key = cache_key::canonical_key(method.as_str(), path, query, &[], body_hash.as_deref());

    // Stage 6: cache lookup. The response that would tell us the real Vary
    // list for this exact request doesn't exist yet, so the lookup key is
    // derived from the *previous* response's Vary list, recorded at store
    // time in a small pointer entry keyed off the primary (no-vary) key.
    // A value that has since changed simply misses this key outright, per
    // the response-driven Vary contract.
    if cacheable_method {
        if let Some(cache) = &state.cache {
            let mut lookup_key = primary_key.clone();
            if let Ok(Some(index)) = cache.get(&cache_key::vary_index_key(&primary_key)).await {
                let vary_names = cache_key::decode_vary_names(&index.body);
                let vary_values = vary_values_from_headers(&vary_names, &headers);
                lookup_key =
                    cache_key::canonical_key(method.as_str(), path, query, &vary_values, body_hash.as_deref());
            }

            match cache.get(&lookup_key).await {
                Ok(Some(entry)) if !entry.is_expired(Utc::now()) => {
                    state.aggregator.record_hit(validated.token_id);
                    return Ok(serve_cached(&entry, &headers, &lookup_key));
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(%err, "cache lookup failed; falling back to upstream");
                }
            }
        }
    }

    // Stages 7-8: credential substitution (inside `forward`) and upstream dispatch.
    let response = forward::forward(
        &state.http_client,
        &state.provider,
        method.clone(),
        &uri_path_and_query(&uri),
        convert_headers(&headers),
        body,
        &validated.upstream_credential,
        state.config.upstream_retry_attempts,
        state.config.upstream_retry_backoff_base,
    )
    .await
    .map_err(|err| {
        tracing::warn!(%err, "upstream forward failed");
        ApiError::upstream_error()
    })?;

    let status = response.status();
    let response_headers = response.headers().clone();
    let content_type = response_headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let is_streaming = content_type.contains("text/event-stream") || response.content_length().is_none();

    let response_cc = response_headers
        .get(http::header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .map(policy::CacheControl::parse)
        .unwrap_or_default();
    let storable_headers = storable_header_pairs(&response_headers);

    // The response's own Vary list is what actually decides the key a
    // cacheable entry gets stored/looked up under from here on; the
    // lookup-time guess above only exists because this doesn't exist yet
    // at stage 6.
    let vary_names = response_headers
        .get(http::header::VARY)
        .and_then(|v| v.to_str().ok())
        .map(cache_key::parse_vary_names)
        .unwrap_or_default();
    let vary_values = vary_values_from_headers(&vary_names, &headers);
    let key = cache_key::canonical_key(method.as_str(), path, query, &vary_values, body_hash.as_deref());

    if is_streaming {
        let (capturing, completion) =
            CapturingStream::new(response.bytes_stream(), state.config.max_capture_bytes);
        let out_headers = build_response_headers(&response_headers, cache_status::MISS, &key);
        let axum_body = Body::from_stream(capturing);

        let state_for_task = state.clone();
        let ctx_for_task = ctx.clone();
        let secret_for_task = secret.clone();
        tokio::spawn(async move {
            if let Ok(captured) = completion.await {
                finalize(
                    &state_for_task,
                    &ctx_for_task,
                    &secret_for_task,
                    validated.token_id,
                    method.as_str(),
                    primary_key,
                    key,
                    vary_names,
                    status.as_u16(),
                    &response_cc,
                    request_cc.as_ref(),
                    storable_headers,
                    captured.body.filter(|_| !captured.truncated),
                )
                .await;
            }
        });

        let mut resp = Response::builder().status(status).body(axum_body).unwrap_or_else(|_| {
            ApiError::internal().into_response()
        });
        *resp.headers_mut() = out_headers;
        return Ok(resp);
    }

    let body_bytes = response.bytes().await.map_err(|err| {
        tracing::warn!(%err, "failed to read upstream response body");
        ApiError::upstream_error()
    })?;

    let out_headers = build_response_headers(&response_headers, cache_status::MISS, &key);
    finalize(
        &state,
        ctx,
        &secret,
        validated.token_id,
        method.as_str(),
        primary_key,
        key.clone(),
        vary_names,
        status.as_u16(),
        &response_cc,
        request_cc.as_ref(),
        storable_headers,
        Some(body_bytes.to_vec()),
    )
    .await;

    let mut resp = (status, ()).into_response();
    *resp.headers_mut() = out_headers;
    *resp.body_mut() = Body::from(body_bytes);
    Ok(resp)
}

fn uri_path_and_query(uri: &http::Uri) -> String {
    uri.path_and_query().map(|p| p.as_str().to_string()).unwrap_or_else(|| uri.path().to_string())
}

fn convert_headers(headers: &HeaderMap) -> reqwest::header::HeaderMap {
    let mut out = reqwest::header::HeaderMap::new();
    for (name, value) in headers.iter() {
        if let (Ok(n), Ok(v)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(n, v);
        }
    }
    out
}

fn storable_header_pairs(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    let pairs: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect();
    policy::filter_storable_headers(&pairs)
}

fn build_response_headers(upstream: &reqwest::header::HeaderMap, status: &str, key: &str) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in upstream.iter() {
        if let (Ok(n), Ok(v)) = (
            http::HeaderName::from_bytes(name.as_str().as_bytes()),
            http::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(n, v);
        }
    }
    if let Ok(v) = HeaderValue::from_str(status) {
        out.insert(CACHE_STATUS_HEADER, v);
    }
    if let Ok(v) = HeaderValue::from_str(&cache_key::diagnostic_digest(key)) {
        out.insert(CACHE_KEY_HEADER, v);
    }
    out
}

fn serve_cached(entry: &CachedResponse, headers: &HeaderMap, key: &str) -> Response {
    let if_none_match = headers.get(http::header::IF_NONE_MATCH).and_then(|v| v.to_str().ok());
    let if_modified_since = headers.get(http::header::IF_MODIFIED_SINCE).and_then(|v| v.to_str().ok());

    if entry.matches_conditional(if_none_match, if_modified_since) {
        let mut resp = Response::builder().status(StatusCode::NOT_MODIFIED).body(Body::empty()).unwrap();
        apply_cache_headers(&mut resp, entry, cache_status::CONDITIONAL_HIT, key);
        return resp;
    }

    let mut resp = Response::builder()
        .status(StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK))
        .body(Body::from(entry.body.clone()))
        .unwrap();
    apply_cache_headers(&mut resp, entry, cache_status::HIT, key);
    resp
}

fn apply_cache_headers(resp: &mut Response, entry: &CachedResponse, status: &str, key: &str) {
    let headers = resp.headers_mut();
    for (name, value) in &entry.headers {
        if let (Ok(n), Ok(v)) = (http::HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            headers.append(n, v);
        }
    }
    if let Ok(v) = HeaderValue::from_str(status) {
        headers.insert(CACHE_STATUS_HEADER, v);
    }
    if let Ok(v) = HeaderValue::from_str(&cache_key::diagnostic_digest(key)) {
        headers.insert(CACHE_KEY_HEADER, v);
    }
}

/// Stages 9-11: cache storage, synchronous usage accounting, and event
/// emission. Shared between the buffered and streaming response paths — the
/// streaming path calls this once the tee'd capture completes, off the
/// client-facing path so it never delays a single forwarded byte.
#[allow(clippy::too_many_arguments)]
async fn finalize(
    state: &Arc<AppState>,
    ctx: &RequestCtx,
    secret: &str,
    token_id: Uuid,
    method: &str,
    primary_key: String,
    key: String,
    vary_names: Vec<String>,
    status: u16,
    response_cc: &policy::CacheControl,
    request_cc: Option<&policy::CacheControl>,
    storable_headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
) {
    if let (Some(cache), Some(body)) = (&state.cache, &body) {
        if policy::is_cacheable(status, response_cc, request_cc)
            && body.len() <= state.config.max_cache_object_bytes
        {
            let ttl = policy::resolve_ttl(response_cc, request_cc, state.config.default_cache_ttl);
            let etag = storable_headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case("etag"))
                .map(|(_, v)| v.clone());
            let last_modified = storable_headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case("last-modified"))
                .map(|(_, v)| v.clone());
            let entry = CachedResponse {
                status,
                headers: storable_headers,
                body: body.clone(),
                etag,
                last_modified,
                expires_at: Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64),
            };
            if let Err(err) = cache.set(&key, entry, ttl).await {
                tracing::warn!(%err, "cache store failed");
            } else {
                // Record which headers this response varied on, so the next
                // request's stage-6 lookup can derive the same secondary key
                // before a new response exists. If the Vary list changed
                // since the last store, entries under the old list are
                // orphaned and expire on their own TTL.
                let index_entry = CachedResponse {
                    status: 0,
                    headers: vec![],
                    body: cache_key::encode_vary_names(&vary_names),
                    etag: None,
                    last_modified: None,
                    expires_at: Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64),
                };
                if let Err(err) = cache.set(&cache_key::vary_index_key(&primary_key), index_entry, ttl).await {
                    tracing::warn!(%err, "vary index store failed");
                }
            }
        }
    }

    // Stage 10: synchronous usage accounting.
    match state.tokens.increment_token_usage(token_id).await {
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(%err, "usage accounting failed after response was already sent");
            audit(
                state,
                AuditAction::ProxyRequest,
                Actor::Token(obfuscate_token(secret)),
                Outcome::Error,
                ctx,
                None,
                Some("usage_accounting_failed"),
            )
            .await;
        }
    }

    // Stage 11: event emission. Bounded and non-blocking; a full bus drops
    // the event rather than ever stalling the pipeline.
    state.event_bus.publish(EventRecord {
        request_id: ctx.request_id.clone(),
        method: method.to_string(),
        path: ctx.path.clone(),
        status,
        duration_ms: ctx.elapsed_ms(),
        request_body: None,
        response_body: body,
        response_headers: Vec::new(),
    });
}

async fn audit(
    state: &Arc<AppState>,
    action: AuditAction,
    actor: Actor,
    outcome: Outcome,
    ctx: &RequestCtx,
    project_id: Option<Uuid>,
    reason: Option<&str>,
) {
    let mut builder = AuditEventBuilder::new(action, actor, outcome)
        .request_id(ctx.request_id.clone())
        .correlation_id(ctx.correlation_id.clone())
        .method(ctx.method.clone())
        .path(ctx.path.clone());
    if let Some(ip) = &ctx.client_ip {
        builder = builder.client_ip(ip.clone());
    }
    if let Some(ua) = &ctx.user_agent {
        builder = builder.user_agent(ua.clone());
    }
    if let Some(id) = project_id {
        builder = builder.project_id(id);
    }
    if let Some(reason) = reason {
        builder = builder.reason(reason);
    }
    if let Err(err) = state.audit.log(builder.build()).await {
        tracing::error!(%err, "audit log write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_strips_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer lpk_abc"));
        assert_eq!(bearer_token(&headers), Some("lpk_abc".to_string()));
    }

    #[test]
    fn missing_authorization_header_yields_none() {
        let headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn client_ip_reads_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 5.6.7.8"));
        assert_eq!(client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn vary_values_pulls_named_headers_only() {
        let mut headers = HeaderMap::new();
        headers.insert("accept-language", HeaderValue::from_static("fr"));
        headers.insert("x-org", HeaderValue::from_static("acme"));
        let names = vec!["accept-language".to_string()];
        let values = vary_values_from_headers(&names, &headers);
        assert_eq!(values, vec![("accept-language".to_string(), "fr".to_string())]);
    }

    #[test]
    fn vary_values_skips_names_absent_from_the_request() {
        let headers = HeaderMap::new();
        let names = vec!["accept-language".to_string()];
        assert!(vary_values_from_headers(&names, &headers).is_empty());
    }
}
