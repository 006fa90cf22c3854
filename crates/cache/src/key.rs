//! Canonical cache key derivation.
//!
//! The key is a human-readable string of the form
//! `METHOD:path?sorted-query#vary:name=value;...#body:<hash>` so
//! `PurgePrefix` on a path segment purges every query/vary variant beneath
//! it. `Authorization` must never be passed in `vary_values` — the caller
//! (the request pipeline) is responsible for excluding it even if a
//! misbehaving upstream lists it in `Vary`.

use sha2::{Digest, Sha256};

pub fn canonical_key(
    method: &str,
    path: &str,
    query: &str,
    vary_values: &[(String, String)],
    body_hash: Option<&str>,
) -> String {
    let mut key = format!("{}:{}", method.to_ascii_uppercase(), path);

    let mut sorted_query: Vec<&str> = query.split('&').filter(|s| !s.is_empty()).collect();
    sorted_query.sort_unstable();
    if !sorted_query.is_empty() {
        key.push('?');
        key.push_str(&sorted_query.join("&"));
    }

    let mut sorted_vary: Vec<(&str, &str)> = vary_values
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("authorization"))
        .map(|(n, v)| (n.as_str(), v.as_str()))
        .collect();
    sorted_vary.sort_unstable_by_key(|(name, _)| name.to_ascii_lowercase());
    if !sorted_vary.is_empty() {
        key.push_str("#vary:");
        for (name, value) in sorted_vary {
            key.push_str(name);
            key.push('=');
            key.push_str(value);
            key.push(';');
        }
    }

    if let Some(hash) = body_hash {
        key.push_str("#body:");
        key.push_str(hash);
    }

    key
}

/// Key for the small pointer entry that records which header names the
/// last response stored for this primary resource varied on. Looked up
/// before the Vary-bearing response exists, so the real (secondary) key
/// can be derived from the *previous* response's Vary list; the current
/// response's own Vary list is what actually gets stored under it next.
pub fn vary_index_key(primary_key: &str) -> String {
    format!("{primary_key}#vary-index")
}

/// Parse a `Vary` header value into the header names it lists, dropping
/// `*` (which per RFC 7231 §7.1.4 means "never reusable from cache" and is
/// handled by the caller refusing to store at all) and `Authorization`
/// (never a valid Vary key dimension here regardless of what a misbehaving
/// upstream lists).
pub fn parse_vary_names(vary_header: &str) -> Vec<String> {
    vary_header
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && *s != "*" && !s.eq_ignore_ascii_case("authorization"))
        .map(|s| s.to_ascii_lowercase())
        .collect()
}

pub fn encode_vary_names(names: &[String]) -> Vec<u8> {
    names.join(",").into_bytes()
}

pub fn decode_vary_names(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

pub fn hash_body(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of the canonical key, used for the `X-Cache-Key`
/// diagnostic header so a sensitive query string never appears verbatim.
pub fn diagnostic_digest(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_param_order_does_not_affect_key() {
        let a = canonical_key("GET", "/v1/models", "b=2&a=1", &[], None);
        let b = canonical_key("GET", "/v1/models", "a=1&b=2", &[], None);
        assert_eq!(a, b);
    }

    #[test]
    fn vary_header_order_does_not_affect_key() {
        let a = canonical_key(
            "GET",
            "/v1/chat",
            "",
            &[("Accept".into(), "json".into()), ("X-Org".into(), "1".into())],
            None,
        );
        let b = canonical_key(
            "GET",
            "/v1/chat",
            "",
            &[("X-Org".into(), "1".into()), ("Accept".into(), "json".into())],
            None,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn authorization_is_never_keyed_even_if_passed() {
        let key = canonical_key(
            "GET",
            "/v1/chat",
            "",
            &[("Authorization".into(), "Bearer secret".into())],
            None,
        );
        assert!(!key.contains("secret"));
    }

    #[test]
    fn different_paths_produce_different_prefixes() {
        let a = canonical_key("GET", "/v1/models", "", &[], None);
        let b = canonical_key("GET", "/v1/chat", "", &[], None);
        assert!(!b.starts_with(&a));
    }

    #[test]
    fn body_hash_distinguishes_otherwise_identical_keys() {
        let a = canonical_key("POST", "/v1/chat", "", &[], Some("aaa"));
        let b = canonical_key("POST", "/v1/chat", "", &[], Some("bbb"));
        assert_ne!(a, b);
    }

    #[test]
    fn parse_vary_names_drops_wildcard_and_authorization() {
        let names = parse_vary_names("Accept-Language, *, Authorization, X-Org");
        assert_eq!(names, vec!["accept-language".to_string(), "x-org".to_string()]);
    }

    #[test]
    fn vary_names_round_trip_through_encoding() {
        let names = vec!["accept-language".to_string(), "x-org".to_string()];
        let decoded = decode_vary_names(&encode_vary_names(&names));
        assert_eq!(decoded, names);
    }

    #[test]
    fn distinct_vary_values_produce_distinct_keys() {
        let a = canonical_key(
            "GET",
            "/v1/chat",
            "",
            &[("accept-language".into(), "en".into())],
            None,
        );
        let b = canonical_key(
            "GET",
            "/v1/chat",
            "",
            &[("accept-language".into(), "fr".into())],
            None,
        );
        assert_ne!(a, b);
    }
}
