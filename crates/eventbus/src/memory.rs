//! In-memory bus: each subscriber owns a bounded `mpsc` channel; a full
//! channel drops the event (not the subscriber) and counts it. `publish`
//! is synchronous and never blocks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::model::EventRecord;
use crate::traits::EventBus;

pub struct InMemoryBus {
    subscribers: Mutex<Vec<mpsc::Sender<EventRecord>>>,
    capacity: usize,
    dropped: AtomicU64,
    stopped: AtomicBool,
}

impl InMemoryBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity,
            dropped: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl EventBus for InMemoryBus {
    fn publish(&self, event: EventRecord) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    request_id = %event.request_id,
                    "event bus subscriber lagging; event dropped"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    fn subscribe(&self) -> mpsc::Receiver<EventRecord> {
        let (tx, rx) = mpsc::channel(self.capacity.max(1));
        self.subscribers.lock().push(tx);
        rx
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.subscribers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> EventRecord {
        EventRecord {
            request_id: id.to_string(),
            method: "POST".into(),
            path: "/v1/chat/completions".into(),
            status: 200,
            duration_ms: 10,
            request_body: None,
            response_body: None,
            response_headers: vec![],
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = InMemoryBus::new(4);
        let mut rx = bus.subscribe();
        bus.publish(sample("r1"));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.request_id, "r1");
    }

    #[tokio::test]
    async fn full_channel_drops_and_counts_without_blocking() {
        let bus = InMemoryBus::new(1);
        let _rx = bus.subscribe();
        bus.publish(sample("r1"));
        bus.publish(sample("r2"));
        assert_eq!(bus.dropped_count(), 1);
    }

    #[tokio::test]
    async fn stop_closes_subscriber_channels() {
        let bus = InMemoryBus::new(4);
        let mut rx = bus.subscribe();
        bus.stop();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn publish_after_stop_is_a_noop() {
        let bus = InMemoryBus::new(4);
        bus.stop();
        bus.publish(sample("r1"));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
