use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::model::{EventRecord, LoggedEvent};

/// Common interface for both bus implementations.
///
/// `publish` never blocks and never errors back to the caller: failures are
/// logged and counted, not propagated, since a slow or unreachable sink must
/// never stall the request pipeline.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: EventRecord);
    /// For the in-memory bus, a live receiver. For the log-backed bus, a
    /// receiver whose sender is dropped immediately — reading from it
    /// returns `None` right away, which is the contractual signal for
    /// consumers to fall back to [`DurableEventLog::read_events`].
    fn subscribe(&self) -> mpsc::Receiver<EventRecord>;
    fn stop(&self);
}

/// Pull-mode contract for the log-backed bus. Implemented alongside
/// [`EventBus`] by the durable backend only.
#[async_trait]
pub trait DurableEventLog: Send + Sync {
    /// Appends the event and returns its assigned, monotonically increasing
    /// LogID.
    async fn append(&self, event: EventRecord) -> anyhow::Result<i64>;
    /// Events with `log_id > from`, ascending, capped at `limit`.
    async fn read_events(&self, from: i64, limit: i64) -> anyhow::Result<Vec<LoggedEvent>>;
    async fn last_committed_offset(&self, consumer_group: &str) -> anyhow::Result<i64>;
    async fn commit_offset(&self, consumer_group: &str, log_id: i64) -> anyhow::Result<()>;
    /// Deletes everything older than the last `keep_last` entries. Returns
    /// the number of rows removed.
    async fn trim(&self, keep_last: i64) -> anyhow::Result<u64>;
}
