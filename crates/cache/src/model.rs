//! The stored shape of a cached upstream response.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    /// Already filtered: no `Date`, `X-Response-Time*`, or `Set-Cookie`.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// `If-None-Match`/`If-Modified-Since` comparison against the stored
    /// validators, per the conditional-hit contract.
    pub fn matches_conditional(&self, if_none_match: Option<&str>, if_modified_since: Option<&str>) -> bool {
        if let (Some(inm), Some(etag)) = (if_none_match, &self.etag) {
            if inm.split(',').any(|tag| tag.trim().trim_start_matches("W/") == etag) {
                return true;
            }
        }
        if let (Some(ims), Some(last_modified)) = (if_modified_since, &self.last_modified) {
            if let (Ok(ims_at), Ok(stored_at)) = (
                DateTime::<FixedOffset>::parse_from_rfc2822(ims.trim()),
                DateTime::<FixedOffset>::parse_from_rfc2822(last_modified.trim()),
            ) {
                if stored_at <= ims_at {
                    return true;
                }
            }
        }
        false
    }

    pub fn byte_size(&self) -> usize {
        self.body.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(etag: Option<&str>, last_modified: Option<&str>) -> CachedResponse {
        CachedResponse {
            status: 200,
            headers: vec![],
            body: vec![],
            etag: etag.map(str::to_string),
            last_modified: last_modified.map(str::to_string),
            expires_at: Utc::now() + chrono::Duration::seconds(60),
        }
    }

    #[test]
    fn etag_match_is_a_conditional_hit() {
        let e = entry(Some("\"abc\""), None);
        assert!(e.matches_conditional(Some("\"abc\""), None));
        assert!(!e.matches_conditional(Some("\"xyz\""), None));
    }

    #[test]
    fn weak_etag_prefix_is_stripped_before_comparing() {
        let e = entry(Some("\"abc\""), None);
        assert!(e.matches_conditional(Some("W/\"abc\""), None));
    }

    #[test]
    fn if_modified_since_matches_when_not_modified_after() {
        let e = entry(None, Some("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert!(e.matches_conditional(None, Some("Wed, 21 Oct 2015 07:28:00 GMT")));
    }

    #[test]
    fn if_modified_since_matches_when_client_date_is_later() {
        // A client revalidating with a date later than the stored
        // Last-Modified still has an up-to-date copy.
        let e = entry(None, Some("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert!(e.matches_conditional(None, Some("Thu, 22 Oct 2015 07:28:00 GMT")));
    }

    #[test]
    fn if_modified_since_misses_when_stored_is_newer() {
        let e = entry(None, Some("Thu, 22 Oct 2015 07:28:00 GMT"));
        assert!(!e.matches_conditional(None, Some("Wed, 21 Oct 2015 07:28:00 GMT")));
    }

    #[test]
    fn unparseable_dates_are_not_a_match() {
        let e = entry(None, Some("not-a-date"));
        assert!(!e.matches_conditional(None, Some("also-not-a-date")));
    }
}
