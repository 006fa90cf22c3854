use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use llmproxy_eventbus::{DurableEventLog, EventRecord};

use crate::config::DispatcherConfig;
use crate::sink::{EventSink, SinkError};

/// A shared handle for stopping a running [`Dispatcher`] and reading its
/// counters. Cloning and calling `stop` more than once is harmless.
#[derive(Clone)]
pub struct DispatcherHandle {
    stopped: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
}

impl DispatcherHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

/// Pulls batches from a [`DurableEventLog`] for one consumer group and
/// delivers them to a sink, persisting the offset only after a successful
/// (or permanently-failed) send so a given LogID is never dispatched twice.
pub struct Dispatcher<L: DurableEventLog, S: EventSink> {
    log: Arc<L>,
    sink: S,
    config: DispatcherConfig,
    stopped: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    delivered: Arc<AtomicU64>,
}

impl<L, S> Dispatcher<L, S>
where
    L: DurableEventLog + 'static,
    S: EventSink + 'static,
{
    pub fn new(log: Arc<L>, sink: S, config: DispatcherConfig) -> (Self, DispatcherHandle) {
        let stopped = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));
        let delivered = Arc::new(AtomicU64::new(0));
        let handle = DispatcherHandle {
            stopped: stopped.clone(),
            dropped: dropped.clone(),
            delivered: delivered.clone(),
        };
        (
            Self {
                log,
                sink,
                config,
                stopped,
                dropped,
                delivered,
            },
            handle,
        )
    }

    /// Runs until [`DispatcherHandle::stop`] is called, then makes a
    /// best-effort final drain and closes the sink. Safe to `tokio::spawn`.
    pub async fn run(mut self) -> Result<(), SinkError> {
        self.sink.init().await?;
        let mut last_seen = self
            .log
            .last_committed_offset(&self.config.consumer_group)
            .await
            .map_err(|err| SinkError::Transient(err.to_string()))?;

        while !self.stopped.load(Ordering::Acquire) {
            if let Err(err) = self.tick(&mut last_seen).await {
                tracing::warn!(%err, "dispatcher tick failed; backing off");
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        // Best-effort final drain before closing.
        let _ = self.tick(&mut last_seen).await;
        self.sink.close().await
    }

    /// Reads and delivers at most one batch. Returns `Ok(())` whether or
    /// not there was anything to deliver; the only errors are log I/O
    /// failures, which the caller backs off and retries on.
    async fn tick(&mut self, last_seen: &mut i64) -> anyhow::Result<()> {
        let events = self
            .log
            .read_events(*last_seen, self.config.batch_size as i64)
            .await?;

        if events.is_empty() {
            tokio::time::sleep(self.config.poll_interval).await;
            return Ok(());
        }

        if events[0].log_id > *last_seen + 1 {
            tracing::warn!(
                consumer_group = %self.config.consumer_group,
                expected_after = *last_seen,
                first_seen = events[0].log_id,
                "gap in durable event log; events were trimmed before consumption"
            );
        }

        let max_id = events.last().expect("checked non-empty").log_id;
        let batch: Vec<EventRecord> = events.into_iter().map(|e| e.record).collect();
        self.deliver(&batch, max_id, last_seen).await
    }

    async fn deliver(&mut self, batch: &[EventRecord], max_id: i64, last_seen: &mut i64) -> anyhow::Result<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.sink.send_events(batch).await {
                Ok(()) => {
                    self.delivered.fetch_add(batch.len() as u64, Ordering::Relaxed);
                    self.log
                        .commit_offset(&self.config.consumer_group, max_id)
                        .await?;
                    *last_seen = max_id;
                    return Ok(());
                }
                Err(SinkError::Permanent(msg)) => {
                    tracing::error!(
                        consumer_group = %self.config.consumer_group,
                        error = %msg,
                        batch_size = batch.len(),
                        "sink rejected batch permanently; treating as delivered"
                    );
                    self.dropped.fetch_add(batch.len() as u64, Ordering::Relaxed);
                    self.log
                        .commit_offset(&self.config.consumer_group, max_id)
                        .await?;
                    *last_seen = max_id;
                    return Ok(());
                }
                Err(SinkError::Transient(msg)) => {
                    if attempt >= self.config.retry_attempts {
                        tracing::warn!(
                            consumer_group = %self.config.consumer_group,
                            error = %msg,
                            batch_size = batch.len(),
                            attempts = attempt,
                            "batch delivery exhausted retries; offset not advanced, will retry next tick"
                        );
                        self.dropped.fetch_add(batch.len() as u64, Ordering::Relaxed);
                        return Ok(());
                    }
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use llmproxy_eventbus::PostgresEventLog;
    use sqlx::any::AnyPoolOptions;
    use std::time::Duration;

    fn sample(id: &str) -> EventRecord {
        EventRecord {
            request_id: id.to_string(),
            method: "POST".into(),
            path: "/v1/chat/completions".into(),
            status: 200,
            duration_ms: 5,
            request_body: None,
            response_body: None,
            response_headers: vec![],
        }
    }

    async fn test_log() -> Arc<PostgresEventLog> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let log = PostgresEventLog::from_pool(pool);
        log.migrate().await.unwrap();
        Arc::new(log)
    }

    fn fast_config() -> DispatcherConfig {
        DispatcherConfig {
            consumer_group: "test-sink".to_string(),
            batch_size: 10,
            flush_interval: Duration::from_millis(20),
            poll_interval: Duration::from_millis(5),
            retry_attempts: 2,
            retry_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn delivers_every_appended_event_exactly_once() {
        let log = test_log().await;
        for id in ["a", "b", "c"] {
            log.append(sample(id)).await.unwrap();
        }

        let sink = RecordingSink::new();
        let (dispatcher, handle) = Dispatcher::new(log.clone(), sink, fast_config());
        let join = tokio::spawn(dispatcher.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();
        join.await.unwrap().unwrap();

        assert_eq!(handle.delivered_count(), 3);
        assert_eq!(log.last_committed_offset("test-sink").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn permanent_failure_counts_as_dropped_and_advances_offset() {
        let log = test_log().await;
        log.append(sample("a")).await.unwrap();

        let mut sink = RecordingSink::new();
        sink.fail_once_with(SinkError::Permanent("bad schema".into()));
        let (dispatcher, handle) = Dispatcher::new(log.clone(), sink, fast_config());
        let join = tokio::spawn(dispatcher.run());

        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.stop();
        join.await.unwrap().unwrap();

        assert_eq!(handle.dropped_count(), 1);
        assert_eq!(handle.delivered_count(), 0);
        assert_eq!(log.last_committed_offset("test-sink").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn resume_after_restart_never_redelivers_a_log_id() {
        let log = test_log().await;
        for id in ["a", "b"] {
            log.append(sample(id)).await.unwrap();
        }

        let sink = RecordingSink::new();
        let (dispatcher, handle) = Dispatcher::new(log.clone(), sink, fast_config());
        let join = tokio::spawn(dispatcher.run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.stop();
        join.await.unwrap().unwrap();
        assert_eq!(log.last_committed_offset("test-sink").await.unwrap(), 2);

        // "Restart": a fresh dispatcher resumes from the persisted offset.
        log.append(sample("c")).await.unwrap();
        let sink2 = RecordingSink::new();
        let (dispatcher2, handle2) = Dispatcher::new(log.clone(), sink2, fast_config());
        let join2 = tokio::spawn(dispatcher2.run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle2.stop();
        join2.await.unwrap().unwrap();

        assert_eq!(handle2.delivered_count(), 1);
        assert_eq!(log.last_committed_offset("test-sink").await.unwrap(), 3);
    }
}
