//! Log-backed durable bus: events are appended to a shared ordered log with
//! a server-assigned monotonic LogID, obtained portably (SQLite or
//! Postgres) from a guarded `UPDATE … RETURNING` on a one-row sequence
//! table rather than a backend-specific identity column.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::Utc;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tokio::sync::mpsc;

use crate::model::{EventRecord, LoggedEvent};
use crate::traits::{DurableEventLog, EventBus};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct PostgresEventLog {
    pool: AnyPool,
}

impl PostgresEventLog {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(10)
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

fn row_to_logged_event(row: &AnyRow) -> anyhow::Result<LoggedEvent> {
    let headers_json: String = row.try_get("response_headers")?;
    let response_headers = serde_json::from_str(&headers_json)?;
    let request_body: Option<String> = row.try_get("request_body")?;
    let response_body: Option<String> = row.try_get("response_body")?;
    Ok(LoggedEvent {
        log_id: row.try_get("log_id")?,
        record: EventRecord {
            request_id: row.try_get("request_id")?,
            method: row.try_get("method")?,
            path: row.try_get("path")?,
            status: row.try_get::<i64, _>("status")? as u16,
            duration_ms: row.try_get::<i64, _>("duration_ms")? as u64,
            request_body: request_body.map(|b| B64.decode(b)).transpose()?,
            response_body: response_body.map(|b| B64.decode(b)).transpose()?,
            response_headers,
        },
    })
}

#[async_trait]
impl DurableEventLog for PostgresEventLog {
    async fn append(&self, event: EventRecord) -> anyhow::Result<i64> {
        let mut tx = self.pool.begin().await?;
        let seq_row = sqlx::query(
            "UPDATE event_log_seq SET next_id = next_id + 1 WHERE id = 1 RETURNING next_id",
        )
        .fetch_one(&mut *tx)
        .await?;
        let log_id: i64 = seq_row.try_get("next_id")?;

        let headers_json = serde_json::to_string(&event.response_headers)?;
        sqlx::query(
            "INSERT INTO event_log (log_id, request_id, method, path, status, duration_ms, \
             request_body, response_body, response_headers, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(log_id)
        .bind(&event.request_id)
        .bind(&event.method)
        .bind(&event.path)
        .bind(event.status as i64)
        .bind(event.duration_ms as i64)
        .bind(event.request_body.as_deref().map(|b| B64.encode(b)))
        .bind(event.response_body.as_deref().map(|b| B64.encode(b)))
        .bind(&headers_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(log_id)
    }

    async fn read_events(&self, from: i64, limit: i64) -> anyhow::Result<Vec<LoggedEvent>> {
        let rows = sqlx::query(
            "SELECT log_id, request_id, method, path, status, duration_ms, request_body, \
             response_body, response_headers FROM event_log WHERE log_id > ? ORDER BY log_id ASC \
             LIMIT ?",
        )
        .bind(from)
        .bind(limit.clamp(1, 10_000))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_logged_event).collect()
    }

    async fn last_committed_offset(&self, consumer_group: &str) -> anyhow::Result<i64> {
        let row = sqlx::query("SELECT last_log_id FROM event_consumer_offsets WHERE consumer_group = ?")
            .bind(consumer_group)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get::<i64, _>("last_log_id")).transpose()?.unwrap_or(0))
    }

    async fn commit_offset(&self, consumer_group: &str, log_id: i64) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO event_consumer_offsets (consumer_group, last_log_id) VALUES (?, ?) \
             ON CONFLICT (consumer_group) DO UPDATE SET last_log_id = excluded.last_log_id",
        )
        .bind(consumer_group)
        .bind(log_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn trim(&self, keep_last: i64) -> anyhow::Result<u64> {
        let row = sqlx::query("SELECT next_id FROM event_log_seq WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        let next_id: i64 = row.try_get("next_id")?;
        let cutoff = next_id - keep_last;
        if cutoff <= 0 {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM event_log WHERE log_id < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Wraps a [`DurableEventLog`] as an [`EventBus`]: `publish` fires an
/// append as a detached task (so it never blocks the caller), and
/// `subscribe` returns the closed-channel sentinel that tells consumers to
/// switch to pull mode.
pub struct DurableEventBus<L: DurableEventLog + 'static> {
    log: Arc<L>,
    stopped: AtomicBool,
}

impl<L: DurableEventLog + 'static> DurableEventBus<L> {
    pub fn new(log: Arc<L>) -> Self {
        Self {
            log,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn log(&self) -> &Arc<L> {
        &self.log
    }
}

impl<L: DurableEventLog + 'static> EventBus for DurableEventBus<L> {
    fn publish(&self, event: EventRecord) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let log = self.log.clone();
        let request_id = event.request_id.clone();
        tokio::spawn(async move {
            if let Err(err) = log.append(event).await {
                tracing::warn!(%request_id, %err, "failed to append event to durable log");
            }
        });
    }

    fn subscribe(&self) -> mpsc::Receiver<EventRecord> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}
