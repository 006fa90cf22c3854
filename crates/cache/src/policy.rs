//! Cacheability and TTL policy. This module only classifies; callers (the
//! request pipeline) decide whether to call `Set`.

use std::time::Duration;

pub const CACHEABLE_STATUSES: [u16; 6] = [200, 203, 301, 308, 404, 410];

pub fn is_cacheable_status(status: u16) -> bool {
    CACHEABLE_STATUSES.contains(&status)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub public: bool,
    pub private: bool,
    pub no_store: bool,
    pub s_maxage: Option<u64>,
    pub max_age: Option<u64>,
}

impl CacheControl {
    pub fn parse(value: &str) -> Self {
        let mut cc = CacheControl::default();
        for directive in value.split(',') {
            let directive = directive.trim();
            let (name, arg) = match directive.split_once('=') {
                Some((n, v)) => (n.trim(), Some(v.trim().trim_matches('"'))),
                None => (directive, None),
            };
            match name.to_ascii_lowercase().as_str() {
                "public" => cc.public = true,
                "private" => cc.private = true,
                "no-store" => cc.no_store = true,
                "s-maxage" => cc.s_maxage = arg.and_then(|v| v.parse().ok()),
                "max-age" => cc.max_age = arg.and_then(|v| v.parse().ok()),
                _ => {}
            }
        }
        cc
    }

    pub fn is_shared_cacheable(&self) -> bool {
        self.public || self.s_maxage.map(|v| v > 0).unwrap_or(false)
    }
}

/// Whether a response may be stored at all, per the response's own
/// directives and (for opt-in cases, e.g. POST) the request's directives.
pub fn is_cacheable(status: u16, response_cc: &CacheControl, request_cc: Option<&CacheControl>) -> bool {
    if !is_cacheable_status(status) {
        return false;
    }
    if response_cc.no_store || response_cc.private {
        return false;
    }
    if response_cc.is_shared_cacheable() {
        return true;
    }
    if let Some(req) = request_cc {
        if req.public && req.max_age.map(|v| v > 0).unwrap_or(false) {
            return true;
        }
    }
    false
}

/// Whether a request bearing `Authorization` may be served from a
/// previously stored entry. Storage itself never keys on `Authorization`;
/// this only gates the serve-from-cache decision for authenticated callers.
pub fn authenticated_request_may_serve(entry_was_shared_cacheable: bool) -> bool {
    entry_was_shared_cacheable
}

pub fn method_is_cacheable(method: &str, request_opted_in: bool) -> bool {
    match method {
        "GET" | "HEAD" => true,
        "POST" => request_opted_in,
        _ => false,
    }
}

/// TTL precedence: response `s-maxage` > response `max-age` > client-forced
/// `max-age` > `default_ttl`.
pub fn resolve_ttl(
    response_cc: &CacheControl,
    request_cc: Option<&CacheControl>,
    default_ttl: Duration,
) -> Duration {
    if let Some(secs) = response_cc.s_maxage {
        return Duration::from_secs(secs);
    }
    if let Some(secs) = response_cc.max_age {
        return Duration::from_secs(secs);
    }
    if let Some(secs) = request_cc.and_then(|cc| cc.max_age) {
        return Duration::from_secs(secs);
    }
    default_ttl
}

const STRIPPED_HEADERS: [&str; 2] = ["date", "set-cookie"];
const STRIPPED_HEADER_PREFIXES: [&str; 2] = ["x-response-time", "x-upstream-latency"];

/// Strips upstream timing fields and `Set-Cookie` before storage so a
/// served-from-cache response never replays a stale timestamp or session
/// cookie.
pub fn filter_storable_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| {
            let lower = name.to_ascii_lowercase();
            !STRIPPED_HEADERS.contains(&lower.as_str())
                && !STRIPPED_HEADER_PREFIXES.iter().any(|p| lower.starts_with(p))
        })
        .cloned()
        .collect()
}
