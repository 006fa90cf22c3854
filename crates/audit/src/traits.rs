use async_trait::async_trait;

use crate::model::AuditEvent;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit I/O error: {0}")]
    Io(String),
    #[error("audit store error: {0}")]
    Store(String),
}

/// The sink the rest of the system logs through. `close` must be safe to
/// call more than once.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log(&self, event: AuditEvent) -> Result<(), AuditError>;
    async fn close(&self) -> Result<(), AuditError>;
}

/// Optional durable store behind the file sink, queried by the management
/// surface for searchable history.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn store_audit_event(&self, event: &AuditEvent) -> Result<(), AuditError>;
}
