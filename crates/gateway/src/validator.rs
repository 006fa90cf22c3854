//! Token Validator (component B): looks up the opaque bearer secret,
//! checks the validity predicate, and resolves the project's upstream
//! credential — memoizing positive results for a short TTL so a hot token
//! doesn't pay for an Argon2id verification on every request.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use llmproxy_core::{obfuscate, ValidationError};
use llmproxy_store::{token, ProjectStore, TokenStore};
use moka::future::Cache;
use secrecy::SecretString;
use uuid::Uuid;

#[derive(Clone)]
pub struct ValidatedToken {
    pub token_id: Uuid,
    pub project_id: Uuid,
    pub upstream_credential: SecretString,
}

pub struct TokenValidator {
    tokens: Arc<dyn TokenStore>,
    projects: Arc<dyn ProjectStore>,
    positive_cache: Cache<String, ValidatedToken>,
}

impl TokenValidator {
    pub fn new(tokens: Arc<dyn TokenStore>, projects: Arc<dyn ProjectStore>, positive_ttl: Duration) -> Self {
        let positive_cache = Cache::builder().time_to_live(positive_ttl).max_capacity(10_000).build();
        Self {
            tokens,
            projects,
            positive_cache,
        }
    }

    /// Invalidate the memoized validation for a secret, e.g. right after a
    /// revocation notification so the cache never outlives the row it
    /// summarized.
    pub async fn invalidate(&self, secret: &str) {
        self.positive_cache.invalidate(&token::lookup_prefix(secret)).await;
    }

    pub async fn validate(&self, secret: &str) -> Result<ValidatedToken, ValidationError> {
        let prefix = token::lookup_prefix(secret);

        if let Some(cached) = self.positive_cache.get(&prefix).await {
            // A cache hit only ever memoizes a prior success; quota state
            // can change between requests, so re-check it against the
            // store rather than trusting the memoized copy blindly.
            return self.recheck_quota(cached).await;
        }

        let validated = self.validate_uncached(secret, &prefix).await?;
        self.positive_cache.insert(prefix, validated.clone()).await;
        Ok(validated)
    }

    async fn recheck_quota(&self, cached: ValidatedToken) -> Result<ValidatedToken, ValidationError> {
        let token = self.tokens.get_token_by_id(cached.token_id).await.map_err(ValidationError::from)?;
        if !token.is_active {
            return Err(ValidationError::Deactivated);
        }
        if token.is_expired(Utc::now()) {
            return Err(ValidationError::Expired);
        }
        if token.is_rate_limited() {
            return Err(ValidationError::RateLimited);
        }
        Ok(cached)
    }

    async fn validate_uncached(&self, secret: &str, prefix: &str) -> Result<ValidatedToken, ValidationError> {
        let token = self
            .tokens
            .get_token_by_prefix(prefix)
            .await
            .map_err(ValidationError::from)?
            .ok_or(ValidationError::Unknown)?;

        if !token::verify_secret(secret, &token.secret_hash) {
            tracing::warn!(token_prefix = %prefix, "token secret did not match stored hash");
            return Err(ValidationError::Invalid);
        }

        let now = Utc::now();
        if !token.is_active {
            return Err(ValidationError::Deactivated);
        }
        if token.is_expired(now) {
            return Err(ValidationError::Expired);
        }
        if token.is_rate_limited() {
            return Err(ValidationError::RateLimited);
        }

        let credential = self
            .projects
            .get_api_key_for_project(token.project_id)
            .await
            .map_err(ValidationError::from)?;

        Ok(ValidatedToken {
            token_id: token.id,
            project_id: token.project_id,
            upstream_credential: credential,
        })
    }
}

/// Obfuscate a bearer secret for a log line or audit field, matching the
/// house rendering used everywhere else a token value is rendered.
pub fn obfuscate_token(secret: &str) -> String {
    obfuscate(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llmproxy_store::{CreateProjectParams, CreateTokenParams, ProjectUpdate, Result, Token, TokenUpdate};
    use parking_lot::Mutex;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    struct FakeStore {
        token: Mutex<Token>,
    }

    #[async_trait]
    impl TokenStore for FakeStore {
        async fn create_token(&self, _: CreateTokenParams) -> Result<(String, Token)> {
            unimplemented!()
        }
        async fn get_token_by_id(&self, _id: Uuid) -> Result<Token> {
            Ok(self.token.lock().clone())
        }
        async fn get_token_by_prefix(&self, _prefix: &str) -> Result<Option<Token>> {
            Ok(Some(self.token.lock().clone()))
        }
        async fn list_tokens(&self, _: i64, _: i64) -> Result<Vec<Token>> {
            unimplemented!()
        }
        async fn list_tokens_by_project(&self, _: Uuid, _: i64, _: i64) -> Result<Vec<Token>> {
            unimplemented!()
        }
        async fn update_token(&self, _: Uuid, _: TokenUpdate) -> Result<Token> {
            unimplemented!()
        }
        async fn revoke_token(&self, _: Uuid) -> Result<bool> {
            self.token.lock().is_active = false;
            Ok(true)
        }
        async fn revoke_batch_tokens(&self, _: &[Uuid]) -> Result<u64> {
            unimplemented!()
        }
        async fn revoke_project_tokens(&self, _: Uuid) -> Result<u64> {
            unimplemented!()
        }
        async fn revoke_expired_tokens(&self) -> Result<u64> {
            unimplemented!()
        }
        async fn increment_token_usage(&self, _: Uuid) -> Result<Token> {
            unimplemented!()
        }
        async fn increment_token_usage_batch(&self, _: &HashMap<Uuid, i64>, _: chrono::DateTime<Utc>) -> Result<u64> {
            unimplemented!()
        }
        async fn increment_cache_hit_count(&self, _: Uuid, _: i64) -> Result<()> {
            unimplemented!()
        }
        async fn increment_cache_hit_count_batch(&self, _: &HashMap<Uuid, i64>) -> Result<()> {
            unimplemented!()
        }
    }

    #[async_trait]
    impl ProjectStore for FakeStore {
        async fn create_project(&self, _: CreateProjectParams<'_>) -> Result<llmproxy_store::Project> {
            unimplemented!()
        }
        async fn get_project_by_id(&self, _: Uuid) -> Result<llmproxy_store::Project> {
            unimplemented!()
        }
        async fn update_project(&self, _: Uuid, _: ProjectUpdate) -> Result<llmproxy_store::Project> {
            unimplemented!()
        }
        async fn get_api_key_for_project(&self, _: Uuid) -> Result<SecretString> {
            Ok(SecretString::from("sk-upstream-secret".to_string()))
        }
        async fn get_project_active(&self, _: Uuid) -> Result<bool> {
            unimplemented!()
        }
        async fn delete_project(&self, _: Uuid) -> Result<bool> {
            unimplemented!()
        }
    }

    fn make_token(secret: &str, is_active: bool, max_requests: Option<i64>, request_count: i64) -> Token {
        Token {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            token_prefix: token::lookup_prefix(secret),
            secret_hash: token::hash_secret(secret).unwrap(),
            expires_at: None,
            is_active,
            deactivated_at: None,
            request_count,
            max_requests,
            created_at: Utc::now(),
            last_used_at: None,
            cache_hit_count: 0,
        }
    }

    fn validator_for(token: Token) -> TokenValidator {
        let store = Arc::new(FakeStore { token: Mutex::new(token) });
        TokenValidator::new(store.clone(), store, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn valid_token_resolves_project_and_credential() {
        let secret = token::generate_secret();
        let validator = validator_for(make_token(&secret, true, None, 0));
        let result = validator.validate(&secret).await.unwrap();
        assert_eq!(result.upstream_credential.expose_secret(), "sk-upstream-secret");
    }

    #[tokio::test]
    async fn wrong_secret_is_invalid() {
        let secret = token::generate_secret();
        let validator = validator_for(make_token(&secret, true, None, 0));
        // A different secret narrows to the same row only if its prefix
        // happens to collide; use the real prefix but a mismatched tail.
        let wrong = format!("{}XXXXXXXXXXXXXXXXXXXXXXXXXXXXXX", &secret[..token::LOOKUP_PREFIX_LEN]);
        let err = validator.validate(&wrong).await.unwrap_err();
        assert_eq!(err, ValidationError::Invalid);
    }

    #[tokio::test]
    async fn deactivated_token_is_rejected() {
        let secret = token::generate_secret();
        let validator = validator_for(make_token(&secret, false, None, 0));
        let err = validator.validate(&secret).await.unwrap_err();
        assert_eq!(err, ValidationError::Deactivated);
    }

    #[tokio::test]
    async fn rate_limited_token_is_rejected_even_from_cache() {
        let secret = token::generate_secret();
        let store = Arc::new(FakeStore {
            token: Mutex::new(make_token(&secret, true, Some(1), 0)),
        });
        let validator = TokenValidator::new(store.clone(), store.clone(), Duration::from_secs(5));

        validator.validate(&secret).await.unwrap();
        store.token.lock().request_count = 1;

        let err = validator.validate(&secret).await.unwrap_err();
        assert_eq!(err, ValidationError::RateLimited);
    }
}
