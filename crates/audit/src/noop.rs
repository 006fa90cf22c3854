use async_trait::async_trait;

use crate::model::AuditEvent;
use crate::traits::{AuditError, AuditSink};

/// Discards every event. For tests that exercise the pipeline without
/// asserting on audit output.
#[derive(Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn log(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), AuditError> {
        Ok(())
    }
}
