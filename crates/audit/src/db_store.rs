use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

use crate::model::AuditEvent;
use crate::traits::{AuditError, AuditStore};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Mirrors audit events into a queryable table, for operators who want to
/// search audit history without grepping the JSONL file.
pub struct SqlAuditStore {
    pool: AnyPool,
}

impl SqlAuditStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AuditStore for SqlAuditStore {
    async fn store_audit_event(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let actor_json = serde_json::to_string(&event.actor).map_err(|e| AuditError::Store(e.to_string()))?;
        let details_json =
            serde_json::to_string(&event.details).map_err(|e| AuditError::Store(e.to_string()))?;

        sqlx::query(
            "INSERT INTO audit_events (id, timestamp, action, actor, outcome, project_id, \
             request_id, correlation_id, client_ip, method, path, user_agent, reason, token_id, \
             details) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(event.timestamp.to_rfc3339())
        .bind(event.action.as_str())
        .bind(actor_json)
        .bind(format!("{:?}", event.outcome).to_lowercase())
        .bind(event.project_id.map(|id| id.to_string()))
        .bind(&event.request_id)
        .bind(&event.correlation_id)
        .bind(&event.client_ip)
        .bind(&event.method)
        .bind(&event.path)
        .bind(&event.user_agent)
        .bind(&event.reason)
        .bind(&event.token_id)
        .bind(details_json)
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError::Store(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Actor, AuditAction, AuditEventBuilder, Outcome};

    async fn test_store() -> SqlAuditStore {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqlAuditStore::from_pool(pool);
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn stores_an_event_without_error() {
        let store = test_store().await;
        let event = AuditEventBuilder::new(AuditAction::ProxyRequest, Actor::System, Outcome::Success)
            .request_id("req-1")
            .detail("latency_ms", 42)
            .build();
        store.store_audit_event(&event).await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_events")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(row.0, 1);
    }
}
