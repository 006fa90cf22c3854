//! Cache-Hit Aggregator (§4.5): a bounded, owned-by-the-pipeline component
//! that batches `IncrementCacheHitCountBatch` calls so a cache hit never
//! pays for a synchronous store round-trip on the request path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use llmproxy_store::TokenStore;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::validator::obfuscate_token;

#[derive(Clone)]
pub struct AggregatorConfig {
    pub capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
        }
    }
}

/// Owns the enqueue side; the pipeline talks to this, never to the store
/// directly, for cache-hit accounting.
pub struct CacheHitAggregator {
    sender: SyncMutex<Option<mpsc::Sender<Uuid>>>,
    stopped: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CacheHitAggregator {
    pub fn spawn(store: Arc<dyn TokenStore>, config: AggregatorConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        let stopped = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));
        let worker = tokio::spawn(run_worker(store, rx, config));
        Self {
            sender: SyncMutex::new(Some(tx)),
            stopped,
            dropped,
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    /// Enqueues a cache hit for `token_id`. Never blocks: a full buffer
    /// drops the event and increments the drop counter, logged with an
    /// obfuscated token id only.
    pub fn record_hit(&self, token_id: Uuid) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let Some(sender) = self.sender.lock().clone() else {
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(token_id) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                token_id = %obfuscate_token(&token_id.to_string()),
                "cache-hit aggregator buffer full; hit dropped"
            );
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stops accepting new hits, drops the sending half so the worker's
    /// final `recv()` observes a closed channel and flushes whatever is
    /// already queued, then waits up to `timeout` for it to finish.
    /// Idempotent: a second call finds no sender and no worker left.
    pub async fn stop(&self, timeout: Duration) {
        self.stopped.store(true, Ordering::Release);
        self.sender.lock().take();
        let mut guard = self.worker.lock().await;
        if let Some(handle) = guard.take() {
            let _ = tokio::time::timeout(timeout, handle).await;
        }
    }
}

async fn run_worker(store: Arc<dyn TokenStore>, mut rx: mpsc::Receiver<Uuid>, config: AggregatorConfig) {
    let mut pending: HashMap<Uuid, i64> = HashMap::new();
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_id = rx.recv() => {
                match maybe_id {
                    Some(id) => {
                        *pending.entry(id).or_insert(0) += 1;
                        if pending.len() >= config.batch_size {
                            flush(&store, &mut pending).await;
                        }
                    }
                    None => {
                        flush(&store, &mut pending).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&store, &mut pending).await;
            }
        }
    }
}

async fn flush(store: &Arc<dyn TokenStore>, pending: &mut HashMap<Uuid, i64>) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::take(pending);
    if let Err(err) = store.increment_cache_hit_count_batch(&batch).await {
        tracing::warn!(%err, batch_size = batch.len(), "cache-hit batch flush failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use llmproxy_store::{CreateProjectParams, CreateTokenParams, ProjectUpdate, Result, Token, TokenUpdate};
    use parking_lot::Mutex;
    use std::sync::Arc as StdArc;

    #[derive(Default)]
    struct RecordingTokenStore {
        batches: Mutex<Vec<HashMap<Uuid, i64>>>,
    }

    #[async_trait]
    impl TokenStore for RecordingTokenStore {
        async fn create_token(&self, _: CreateTokenParams) -> Result<(String, Token)> {
            unimplemented!()
        }
        async fn get_token_by_id(&self, _: Uuid) -> Result<Token> {
            unimplemented!()
        }
        async fn get_token_by_prefix(&self, _: &str) -> Result<Option<Token>> {
            unimplemented!()
        }
        async fn list_tokens(&self, _: i64, _: i64) -> Result<Vec<Token>> {
            unimplemented!()
        }
        async fn list_tokens_by_project(&self, _: Uuid, _: i64, _: i64) -> Result<Vec<Token>> {
            unimplemented!()
        }
        async fn update_token(&self, _: Uuid, _: TokenUpdate) -> Result<Token> {
            unimplemented!()
        }
        async fn revoke_token(&self, _: Uuid) -> Result<bool> {
            unimplemented!()
        }
        async fn revoke_batch_tokens(&self, _: &[Uuid]) -> Result<u64> {
            unimplemented!()
        }
        async fn revoke_project_tokens(&self, _: Uuid) -> Result<u64> {
            unimplemented!()
        }
        async fn revoke_expired_tokens(&self) -> Result<u64> {
            unimplemented!()
        }
        async fn increment_token_usage(&self, _: Uuid) -> Result<Token> {
            unimplemented!()
        }
        async fn increment_token_usage_batch(&self, _: &HashMap<Uuid, i64>, _: DateTime<Utc>) -> Result<u64> {
            unimplemented!()
        }
        async fn increment_cache_hit_count(&self, _: Uuid, _: i64) -> Result<()> {
            unimplemented!()
        }
        async fn increment_cache_hit_count_batch(&self, deltas: &HashMap<Uuid, i64>) -> Result<()> {
            self.batches.lock().push(deltas.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn flushes_when_batch_size_reached() {
        let store = StdArc::new(RecordingTokenStore::default());
        let config = AggregatorConfig {
            capacity: 1000,
            batch_size: 3,
            flush_interval: Duration::from_secs(60),
        };
        let aggregator = CacheHitAggregator::spawn(store.clone(), config);

        let id = Uuid::new_v4();
        for _ in 0..3 {
            aggregator.record_hit(id);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let batches = store.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].get(&id), Some(&3));
    }

    #[tokio::test]
    async fn flushes_on_interval_even_below_batch_size() {
        let store = StdArc::new(RecordingTokenStore::default());
        let config = AggregatorConfig {
            capacity: 1000,
            batch_size: 100,
            flush_interval: Duration::from_millis(20),
        };
        let aggregator = CacheHitAggregator::spawn(store.clone(), config);

        aggregator.record_hit(Uuid::new_v4());
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(store.batches.lock().len(), 1);
    }

    #[tokio::test]
    async fn full_buffer_drops_and_counts() {
        let store = StdArc::new(RecordingTokenStore::default());
        let config = AggregatorConfig {
            capacity: 1,
            batch_size: 100,
            flush_interval: Duration::from_secs(60),
        };
        let aggregator = CacheHitAggregator::spawn(store, config);

        // Fill the channel without letting the worker drain it by
        // recording hits faster than the task gets scheduled; in practice
        // a capacity-1 channel plus two rapid sends is enough to observe
        // at least one drop on a loaded CI runner, so this assertion is
        // best-effort on drop *counting*, not exact timing.
        for _ in 0..50 {
            aggregator.record_hit(Uuid::new_v4());
        }
        // Not asserting dropped_count() > 0 here (scheduling-dependent);
        // asserting the call never panics/blocks is the actual property.
        let _ = aggregator.dropped_count();
    }

    #[tokio::test]
    async fn enqueue_after_stop_is_a_noop() {
        let store = StdArc::new(RecordingTokenStore::default());
        let aggregator = CacheHitAggregator::spawn(store.clone(), AggregatorConfig::default());
        aggregator.stop(Duration::from_millis(100)).await;
        aggregator.record_hit(Uuid::new_v4());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.batches.lock().is_empty());
    }
}
