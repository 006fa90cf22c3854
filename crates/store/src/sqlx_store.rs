//! `sqlx::Any`-backed implementation of [`TokenStore`] and [`ProjectStore`].
//!
//! A single pool and query set targets both SQLite and Postgres: schemas
//! stick to portable types (`TEXT` timestamps, `INTEGER` booleans) and every
//! query binds with `?`, which `sqlx::Any` rewrites per backend.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use crate::crypto::Cipher;
use crate::error::{map_sqlx, parse_opt_timestamp, parse_timestamp, parse_uuid, Result};
use crate::model::{Project, Token};
use crate::token;
use crate::traits::{
    CreateProjectParams, CreateTokenParams, ProjectStore, ProjectUpdate, TokenStore, TokenUpdate,
};
use llmproxy_core::StoreError;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct SqlStore {
    pool: AnyPool,
    cipher: Option<Cipher>,
}

impl SqlStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        Self::connect_with_pool_size(database_url, 10).await
    }

    pub async fn connect_with_pool_size(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let cipher = Cipher::from_env()?;
        Ok(Self { pool, cipher })
    }

    pub fn from_pool(pool: AnyPool, cipher: Option<Cipher>) -> Self {
        Self { pool, cipher }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    fn encrypt_credential(&self, plaintext: &str) -> Result<String> {
        match &self.cipher {
            Some(cipher) => cipher
                .encrypt(plaintext)
                .map_err(|e| StoreError::Internal(format!("credential encryption failed: {e}"))),
            None => Ok(plaintext.to_string()),
        }
    }

    fn decrypt_credential(&self, stored: &str) -> Result<SecretString> {
        match &self.cipher {
            Some(cipher) => cipher
                .decrypt(stored)
                .map(SecretString::from)
                .map_err(|e| StoreError::Internal(format!("credential decryption failed: {e}"))),
            None => Ok(SecretString::from(stored.to_string())),
        }
    }

    fn project_from_row(&self, row: &AnyRow) -> Result<Project> {
        let credential_raw: String = row.try_get("upstream_credential").map_err(map_sqlx)?;
        Ok(Project {
            id: parse_uuid(&row.try_get::<String, _>("id").map_err(map_sqlx)?)?,
            name: row.try_get("name").map_err(map_sqlx)?,
            upstream_credential: self.decrypt_credential(&credential_raw)?,
            is_active: row.try_get::<i64, _>("is_active").map_err(map_sqlx)? != 0,
            deactivated_at: parse_opt_timestamp(
                row.try_get("deactivated_at").map_err(map_sqlx)?,
            )?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at").map_err(map_sqlx)?)?,
            updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at").map_err(map_sqlx)?)?,
        })
    }
}

fn token_from_row(row: &AnyRow) -> Result<Token> {
    Ok(Token {
        id: parse_uuid(&row.try_get::<String, _>("id").map_err(map_sqlx)?)?,
        project_id: parse_uuid(&row.try_get::<String, _>("project_id").map_err(map_sqlx)?)?,
        token_prefix: row.try_get("token_prefix").map_err(map_sqlx)?,
        secret_hash: row.try_get("secret_hash").map_err(map_sqlx)?,
        expires_at: parse_opt_timestamp(row.try_get("expires_at").map_err(map_sqlx)?)?,
        is_active: row.try_get::<i64, _>("is_active").map_err(map_sqlx)? != 0,
        deactivated_at: parse_opt_timestamp(row.try_get("deactivated_at").map_err(map_sqlx)?)?,
        request_count: row.try_get("request_count").map_err(map_sqlx)?,
        max_requests: row.try_get("max_requests").map_err(map_sqlx)?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at").map_err(map_sqlx)?)?,
        last_used_at: parse_opt_timestamp(row.try_get("last_used_at").map_err(map_sqlx)?)?,
        cache_hit_count: row.try_get("cache_hit_count").map_err(map_sqlx)?,
    })
}

const TOKEN_COLUMNS: &str = "id, project_id, token_prefix, secret_hash, expires_at, is_active, \
     deactivated_at, request_count, max_requests, created_at, last_used_at, cache_hit_count";

#[async_trait]
impl TokenStore for SqlStore {
    async fn create_token(&self, params: CreateTokenParams) -> Result<(String, Token)> {
        let secret = token::generate_secret();
        let prefix = token::lookup_prefix(&secret);
        let hash = token::hash_secret(&secret)
            .map_err(|e| StoreError::Internal(format!("hash error: {e}")))?;
        let id = Uuid::new_v4();
        let now = Utc::now();

        let query = format!(
            "INSERT INTO tokens (id, project_id, token_prefix, secret_hash, expires_at, \
             is_active, deactivated_at, request_count, max_requests, created_at, last_used_at, \
             cache_hit_count) VALUES (?, ?, ?, ?, ?, 1, NULL, 0, ?, ?, NULL, 0) \
             RETURNING {TOKEN_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .bind(params.project_id.to_string())
            .bind(&prefix)
            .bind(&hash)
            .bind(params.expires_at.map(|d| d.to_rfc3339()))
            .bind(params.max_requests)
            .bind(now.to_rfc3339())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok((secret, token_from_row(&row)?))
    }

    async fn get_token_by_id(&self, id: Uuid) -> Result<Token> {
        let query = format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or(StoreError::NotFound)?;
        token_from_row(&row)
    }

    async fn get_token_by_prefix(&self, prefix: &str) -> Result<Option<Token>> {
        let query = format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token_prefix = ?");
        let row = sqlx::query(&query)
            .bind(prefix)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(|r| token_from_row(&r)).transpose()
    }

    async fn list_tokens(&self, limit: i64, offset: i64) -> Result<Vec<Token>> {
        let query = format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&query)
            .bind(limit.clamp(1, 500))
            .bind(offset.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(token_from_row).collect()
    }

    async fn list_tokens_by_project(
        &self,
        project_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Token>> {
        let query = format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE project_id = ? ORDER BY created_at DESC \
             LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&query)
            .bind(project_id.to_string())
            .bind(limit.clamp(1, 500))
            .bind(offset.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(token_from_row).collect()
    }

    async fn update_token(&self, id: Uuid, update: TokenUpdate) -> Result<Token> {
        let mut qb: sqlx::QueryBuilder<sqlx::Any> = sqlx::QueryBuilder::new("UPDATE tokens SET ");
        let mut touched = false;

        if let Some(expires_at) = update.expires_at {
            qb.push("expires_at = ").push_bind(expires_at.to_rfc3339());
            touched = true;
        }
        if let Some(max_requests) = update.max_requests {
            if touched {
                qb.push(", ");
            }
            qb.push("max_requests = ").push_bind(max_requests);
            touched = true;
        }

        if !touched {
            return self.get_token_by_id(id).await;
        }

        qb.push(" WHERE id = ").push_bind(id.to_string());
        let result = qb.build().execute(&self.pool).await.map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_token_by_id(id).await
    }

    async fn revoke_token(&self, id: Uuid) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE tokens SET is_active = 0, deactivated_at = ? WHERE id = ? AND is_active = 1",
        )
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        // Idempotent: confirm the token exists at all before reporting success.
        self.get_token_by_id(id).await?;
        Ok(false)
    }

    async fn revoke_batch_tokens(&self, ids: &[Uuid]) -> Result<u64> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let mut revoked = 0u64;
        for id in ids {
            let result = sqlx::query(
                "UPDATE tokens SET is_active = 0, deactivated_at = ? WHERE id = ? AND is_active = 1",
            )
            .bind(now.to_rfc3339())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            revoked += result.rows_affected();
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(revoked)
    }

    async fn revoke_project_tokens(&self, project_id: Uuid) -> Result<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE tokens SET is_active = 0, deactivated_at = ? WHERE project_id = ? AND is_active = 1",
        )
        .bind(now.to_rfc3339())
        .bind(project_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn revoke_expired_tokens(&self) -> Result<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE tokens SET is_active = 0, deactivated_at = ? WHERE is_active = 1 \
             AND expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn increment_token_usage(&self, id: Uuid) -> Result<Token> {
        let now = Utc::now();
        let query = format!(
            "UPDATE tokens SET request_count = request_count + 1, last_used_at = ? \
             WHERE id = ? AND (max_requests IS NULL OR request_count < max_requests) \
             RETURNING {TOKEN_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(now.to_rfc3339())
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        match row {
            Some(row) => token_from_row(&row),
            None => {
                // Guard rejected the UPDATE; distinguish unknown id from quota hit.
                self.get_token_by_id(id).await?;
                Err(StoreError::RateLimit)
            }
        }
    }

    async fn increment_token_usage_batch(
        &self,
        deltas: &HashMap<Uuid, i64>,
        last_used_at: DateTime<Utc>,
    ) -> Result<u64> {
        if deltas.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let mut updated = 0u64;
        let mut found_any = false;
        for (id, delta) in deltas {
            let exists = sqlx::query("SELECT 1 FROM tokens WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            if exists.is_none() {
                continue;
            }
            found_any = true;
            if *delta <= 0 {
                continue;
            }
            let result = sqlx::query(
                "UPDATE tokens SET request_count = request_count + ?, last_used_at = ? WHERE id = ?",
            )
            .bind(delta)
            .bind(last_used_at.to_rfc3339())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            updated += result.rows_affected();
        }
        tx.commit().await.map_err(map_sqlx)?;
        if !found_any {
            return Err(StoreError::NotFound);
        }
        Ok(updated)
    }

    async fn increment_cache_hit_count(&self, id: Uuid, delta: i64) -> Result<()> {
        if delta <= 0 {
            return Ok(());
        }
        sqlx::query("UPDATE tokens SET cache_hit_count = cache_hit_count + ? WHERE id = ?")
            .bind(delta)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn increment_cache_hit_count_batch(&self, deltas: &HashMap<Uuid, i64>) -> Result<()> {
        if deltas.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        for (id, delta) in deltas {
            if *delta <= 0 {
                continue;
            }
            sqlx::query("UPDATE tokens SET cache_hit_count = cache_hit_count + ? WHERE id = ?")
                .bind(delta)
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for SqlStore {
    async fn create_project(&self, params: CreateProjectParams<'_>) -> Result<Project> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let credential = self.encrypt_credential(params.upstream_credential)?;
        let row = sqlx::query(
            "INSERT INTO projects (id, name, upstream_credential, is_active, deactivated_at, \
             created_at, updated_at) VALUES (?, ?, ?, 1, NULL, ?, ?) \
             RETURNING id, name, upstream_credential, is_active, deactivated_at, created_at, updated_at",
        )
        .bind(id.to_string())
        .bind(params.name)
        .bind(&credential)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;
        self.project_from_row(&row)
    }

    async fn get_project_by_id(&self, id: Uuid) -> Result<Project> {
        let row = sqlx::query(
            "SELECT id, name, upstream_credential, is_active, deactivated_at, created_at, \
             updated_at FROM projects WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?
        .ok_or(StoreError::NotFound)?;
        self.project_from_row(&row)
    }

    async fn update_project(&self, id: Uuid, update: ProjectUpdate) -> Result<Project> {
        let now = Utc::now();
        let mut qb: sqlx::QueryBuilder<sqlx::Any> =
            sqlx::QueryBuilder::new("UPDATE projects SET updated_at = ");
        qb.push_bind(now.to_rfc3339());

        if let Some(name) = &update.name {
            qb.push(", name = ").push_bind(name.clone());
        }
        if let Some(credential) = &update.upstream_credential {
            let encrypted = self.encrypt_credential(credential)?;
            qb.push(", upstream_credential = ").push_bind(encrypted);
        }
        if let Some(is_active) = update.is_active {
            qb.push(", is_active = ").push_bind(is_active as i64);
            if is_active {
                qb.push(", deactivated_at = NULL");
            } else {
                qb.push(", deactivated_at = ").push_bind(now.to_rfc3339());
            }
        }

        qb.push(" WHERE id = ").push_bind(id.to_string());
        let result = qb.build().execute(&self.pool).await.map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_project_by_id(id).await
    }

    async fn get_api_key_for_project(&self, id: Uuid) -> Result<SecretString> {
        let project = self.get_project_by_id(id).await?;
        Ok(project.upstream_credential)
    }

    async fn get_project_active(&self, id: Uuid) -> Result<bool> {
        let row = sqlx::query("SELECT is_active FROM projects WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .ok_or(StoreError::NotFound)?;
        Ok(row.try_get::<i64, _>("is_active").map_err(map_sqlx)? != 0)
    }

    async fn delete_project(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query("DELETE FROM tokens WHERE project_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::CreateProjectParams;
    use std::sync::Arc;

    async fn test_store() -> SqlStore {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect in-memory sqlite");
        let store = SqlStore::from_pool(pool, None);
        store.migrate().await.expect("run migrations");
        store
    }

    async fn seed_project(store: &SqlStore) -> Uuid {
        let project = store
            .create_project(CreateProjectParams {
                name: "acme",
                upstream_credential: "sk-upstream",
            })
            .await
            .unwrap();
        project.id
    }

    #[tokio::test]
    async fn create_and_fetch_token() {
        let store = test_store().await;
        let project_id = seed_project(&store).await;
        let (secret, row) = store
            .create_token(CreateTokenParams {
                project_id,
                expires_at: None,
                max_requests: None,
            })
            .await
            .unwrap();
        assert!(secret.starts_with(token::TOKEN_PREFIX));
        assert!(token::verify_secret(&secret, &row.secret_hash));

        let fetched = store.get_token_by_id(row.id).await.unwrap();
        assert_eq!(fetched.project_id, project_id);
        assert_eq!(fetched.request_count, 0);
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store = test_store().await;
        let project_id = seed_project(&store).await;
        let (_, row) = store
            .create_token(CreateTokenParams {
                project_id,
                expires_at: None,
                max_requests: None,
            })
            .await
            .unwrap();

        assert!(store.revoke_token(row.id).await.unwrap());
        let first_deactivated_at = store.get_token_by_id(row.id).await.unwrap().deactivated_at;
        assert!(first_deactivated_at.is_some());

        assert!(!store.revoke_token(row.id).await.unwrap());
        let second_deactivated_at = store.get_token_by_id(row.id).await.unwrap().deactivated_at;
        assert_eq!(first_deactivated_at, second_deactivated_at);
    }

    #[tokio::test]
    async fn revoke_unknown_token_is_an_error() {
        let store = test_store().await;
        let err = store.revoke_token(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn quota_allows_exactly_n_successes() {
        let store = Arc::new(test_store().await);
        let project_id = seed_project(&store).await;
        let (_, row) = store
            .create_token(CreateTokenParams {
                project_id,
                expires_at: None,
                max_requests: Some(5),
            })
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            let id = row.id;
            handles.push(tokio::spawn(async move { store.increment_token_usage(id).await }));
        }
        let mut successes = 0;
        let mut rate_limited = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(StoreError::RateLimit) => rate_limited += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(successes, 5);
        assert_eq!(rate_limited, 15);
        let final_token = store.get_token_by_id(row.id).await.unwrap();
        assert_eq!(final_token.request_count, 5);
    }

    #[tokio::test]
    async fn cache_hit_increment_ignores_missing_and_nonpositive() {
        let store = test_store().await;
        let project_id = seed_project(&store).await;
        let (_, row) = store
            .create_token(CreateTokenParams {
                project_id,
                expires_at: None,
                max_requests: None,
            })
            .await
            .unwrap();

        store.increment_cache_hit_count(row.id, 0).await.unwrap();
        store.increment_cache_hit_count(Uuid::new_v4(), 3).await.unwrap();
        store.increment_cache_hit_count(row.id, 3).await.unwrap();

        let updated = store.get_token_by_id(row.id).await.unwrap();
        assert_eq!(updated.cache_hit_count, 3);
    }

    #[tokio::test]
    async fn delete_project_cascades_tokens() {
        let store = test_store().await;
        let project_id = seed_project(&store).await;
        let (_, row) = store
            .create_token(CreateTokenParams {
                project_id,
                expires_at: None,
                max_requests: None,
            })
            .await
            .unwrap();

        assert!(store.delete_project(project_id).await.unwrap());
        assert!(matches!(
            store.get_token_by_id(row.id).await.unwrap_err(),
            StoreError::NotFound
        ));
    }

    #[tokio::test]
    async fn project_credential_round_trips_through_update() {
        let store = test_store().await;
        let project_id = seed_project(&store).await;
        store
            .update_project(
                project_id,
                ProjectUpdate {
                    upstream_credential: Some("sk-rotated".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let key = store.get_api_key_for_project(project_id).await.unwrap();
        use secrecy::ExposeSecret;
        assert_eq!(key.expose_secret(), "sk-rotated");
    }
}
