//! Store contracts. `SqlStore` (see [`crate::sqlx_store`]) is the only
//! implementation today; the trait split lets the gateway and dispatcher
//! depend on behavior rather than a concrete backend.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Project, Token};

pub struct CreateTokenParams {
    pub project_id: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_requests: Option<i64>,
}

#[derive(Default)]
pub struct TokenUpdate {
    pub expires_at: Option<DateTime<Utc>>,
    pub max_requests: Option<i64>,
}

pub struct CreateProjectParams<'a> {
    pub name: &'a str,
    pub upstream_credential: &'a str,
}

#[derive(Default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub upstream_credential: Option<String>,
    pub is_active: Option<bool>,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Returns the raw secret (shown to the caller exactly once) and the
    /// stored row.
    async fn create_token(&self, params: CreateTokenParams) -> Result<(String, Token)>;
    async fn get_token_by_id(&self, id: Uuid) -> Result<Token>;
    async fn get_token_by_prefix(&self, prefix: &str) -> Result<Option<Token>>;
    async fn list_tokens(&self, limit: i64, offset: i64) -> Result<Vec<Token>>;
    async fn list_tokens_by_project(
        &self,
        project_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Token>>;
    async fn update_token(&self, id: Uuid, update: TokenUpdate) -> Result<Token>;
    /// Idempotent: returns `Ok(true)` the first time a token transitions to
    /// inactive, `Ok(false)` on every call after.
    async fn revoke_token(&self, id: Uuid) -> Result<bool>;
    async fn revoke_batch_tokens(&self, ids: &[Uuid]) -> Result<u64>;
    async fn revoke_project_tokens(&self, project_id: Uuid) -> Result<u64>;
    async fn revoke_expired_tokens(&self) -> Result<u64>;
    async fn increment_token_usage(&self, id: Uuid) -> Result<Token>;
    async fn increment_token_usage_batch(
        &self,
        deltas: &HashMap<Uuid, i64>,
        last_used_at: DateTime<Utc>,
    ) -> Result<u64>;
    async fn increment_cache_hit_count(&self, id: Uuid, delta: i64) -> Result<()>;
    async fn increment_cache_hit_count_batch(&self, deltas: &HashMap<Uuid, i64>) -> Result<()>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn create_project(&self, params: CreateProjectParams<'_>) -> Result<Project>;
    async fn get_project_by_id(&self, id: Uuid) -> Result<Project>;
    async fn update_project(&self, id: Uuid, update: ProjectUpdate) -> Result<Project>;
    async fn get_api_key_for_project(&self, id: Uuid) -> Result<SecretString>;
    async fn get_project_active(&self, id: Uuid) -> Result<bool>;
    /// Cascades: deletes every token belonging to the project first.
    async fn delete_project(&self, id: Uuid) -> Result<bool>;
}
