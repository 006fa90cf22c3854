//! Persistent shapes for projects and tokens.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use uuid::Uuid;

#[derive(Clone)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub upstream_credential: SecretString,
    pub is_active: bool,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("is_active", &self.is_active)
            .field("deactivated_at", &self.deactivated_at)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct Token {
    pub id: Uuid,
    pub project_id: Uuid,
    pub token_prefix: String,
    pub secret_hash: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub request_count: i64,
    pub max_requests: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub cache_hit_count: i64,
}

impl Token {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| e <= now).unwrap_or(false)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.max_requests
            .map(|max| self.request_count >= max)
            .unwrap_or(false)
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now) && !self.is_rate_limited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(request_count: i64, max_requests: Option<i64>, expires_at: Option<DateTime<Utc>>) -> Token {
        Token {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            token_prefix: "lpk_aaaaaaaa".into(),
            secret_hash: "$argon2id$...".into(),
            expires_at,
            is_active: true,
            deactivated_at: None,
            request_count,
            max_requests,
            created_at: Utc::now(),
            last_used_at: None,
            cache_hit_count: 0,
        }
    }

    #[test]
    fn valid_when_unbounded() {
        let t = sample(0, None, None);
        assert!(t.is_valid(Utc::now()));
    }

    #[test]
    fn rate_limited_at_quota() {
        let t = sample(5, Some(5), None);
        assert!(t.is_rate_limited());
        assert!(!t.is_valid(Utc::now()));
    }

    #[test]
    fn below_quota_is_not_rate_limited() {
        let t = sample(4, Some(5), None);
        assert!(!t.is_rate_limited());
    }

    #[test]
    fn expiry_in_the_past_is_expired() {
        let t = sample(0, None, Some(Utc::now() - chrono::Duration::seconds(1)));
        assert!(t.is_expired(Utc::now()));
        assert!(!t.is_valid(Utc::now()));
    }

    #[test]
    fn inactive_token_is_never_valid() {
        let mut t = sample(0, None, None);
        t.is_active = false;
        assert!(!t.is_valid(Utc::now()));
    }
}
