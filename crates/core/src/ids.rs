//! Request/correlation id helpers shared by the pipeline and the audit sink.

use http::HeaderMap;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Pull `X-Request-ID` from the incoming headers, generating a fresh UUIDv4
/// when absent.
pub fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(new_id)
}

/// `X-Correlation-ID` is propagated the same way but, unlike the request id,
/// is allowed to span multiple hops/requests, so it falls back to the
/// request id itself rather than a fresh value when absent.
pub fn correlation_id_from_headers(headers: &HeaderMap, request_id: &str) -> String {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| request_id.to_string())
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_when_absent() {
        let headers = HeaderMap::new();
        let id = request_id_from_headers(&headers);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn propagates_when_present() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, "abc-123".parse().unwrap());
        assert_eq!(request_id_from_headers(&headers), "abc-123");
    }

    #[test]
    fn correlation_falls_back_to_request_id() {
        let headers = HeaderMap::new();
        assert_eq!(correlation_id_from_headers(&headers, "req-1"), "req-1");
    }
}
