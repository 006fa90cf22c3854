use async_trait::async_trait;
use llmproxy_eventbus::EventRecord;

/// A batch delivery failure. `Permanent` means the sink itself rejected the
/// batch in a way retrying cannot fix (bad credentials, schema mismatch);
/// the dispatcher treats that as delivered so it doesn't spin forever on
/// the same poisoned batch. `Transient` is retried up to the configured
/// attempt budget.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("transient sink error: {0}")]
    Transient(String),
    #[error("permanent sink error: {0}")]
    Permanent(String),
}

/// A delivery target for dispatched event batches.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn init(&mut self) -> Result<(), SinkError>;
    async fn send_events(&mut self, batch: &[EventRecord]) -> Result<(), SinkError>;
    async fn close(&mut self) -> Result<(), SinkError>;
}

/// A sink that records every batch it receives, for tests and local
/// development. `fail_next` lets a test force one delivery to fail.
#[derive(Default)]
pub struct RecordingSink {
    pub delivered: Vec<Vec<EventRecord>>,
    pub closed: bool,
    pub fail_next: Option<SinkError>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_once_with(&mut self, err: SinkError) {
        self.fail_next = Some(err);
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn init(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn send_events(&mut self, batch: &[EventRecord]) -> Result<(), SinkError> {
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        self.delivered.push(batch.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.closed = true;
        Ok(())
    }
}
