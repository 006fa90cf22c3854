use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Consumer group name; the durable log persists one offset per group.
    pub consumer_group: String,
    /// Flush when this many events have accumulated.
    pub batch_size: usize,
    /// Or flush after this much time has passed since the last flush,
    /// whichever comes first.
    pub flush_interval: Duration,
    /// How long to wait between polls of the log when the last read was
    /// empty.
    pub poll_interval: Duration,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            consumer_group: "default".to_string(),
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}
