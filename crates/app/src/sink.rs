//! The dispatcher's default delivery target: logs each batch via `tracing`
//! rather than forwarding it to an external analytics endpoint, since that
//! endpoint is itself an external collaborator this binary doesn't define.

use async_trait::async_trait;
use llmproxy_dispatcher::{EventSink, SinkError};
use llmproxy_eventbus::EventRecord;

#[derive(Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn init(&mut self) -> Result<(), SinkError> {
        tracing::info!("event dispatcher sink initialized");
        Ok(())
    }

    async fn send_events(&mut self, batch: &[EventRecord]) -> Result<(), SinkError> {
        for event in batch {
            tracing::info!(
                request_id = %event.request_id,
                method = %event.method,
                path = %event.path,
                status = event.status,
                duration_ms = event.duration_ms,
                "dispatched request event"
            );
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
