//! Tee-reader capture for streaming upstream responses: bytes are handed
//! to the client as they arrive, unmodified and undelayed, while a
//! side buffer accumulates up to a configured cap for post-completion
//! cacheability evaluation. Exceeding the cap stops buffering (the client
//! keeps streaming); dropping the stream early — client disconnect — fires
//! the same completion signal with whatever was captured so far, so the
//! pipeline's bookkeeping always runs exactly once.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::oneshot;

pub struct CaptureResult {
    pub body: Option<Vec<u8>>,
    pub truncated: bool,
    pub total_bytes: u64,
}

struct CaptureState {
    buffer: Vec<u8>,
    limit: usize,
    truncated: bool,
    total_bytes: u64,
}

/// Wraps an upstream byte stream, forwarding every chunk unchanged to the
/// caller while mirroring it into a capped side buffer.
pub struct CapturingStream<S> {
    inner: S,
    state: Option<CaptureState>,
    completion: Option<oneshot::Sender<CaptureResult>>,
}

impl<S> CapturingStream<S> {
    pub fn new(inner: S, limit: usize) -> (Self, oneshot::Receiver<CaptureResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                inner,
                state: Some(CaptureState {
                    buffer: Vec::new(),
                    limit,
                    truncated: false,
                    total_bytes: 0,
                }),
                completion: Some(tx),
            },
            rx,
        )
    }

    fn finish(&mut self) {
        if let (Some(state), Some(tx)) = (self.state.take(), self.completion.take()) {
            let result = CaptureResult {
                body: if state.truncated { None } else { Some(state.buffer) },
                truncated: state.truncated,
                total_bytes: state.total_bytes,
            };
            let _ = tx.send(result);
        }
    }
}

impl<S, E> Stream for CapturingStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(state) = this.state.as_mut() {
                    state.total_bytes += chunk.len() as u64;
                    if !state.truncated {
                        if state.buffer.len() + chunk.len() > state.limit {
                            state.truncated = true;
                            state.buffer.clear();
                            state.buffer.shrink_to_fit();
                        } else {
                            state.buffer.extend_from_slice(&chunk);
                        }
                    }
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(err))) => {
                this.finish();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for CapturingStream<S> {
    fn drop(&mut self) {
        // Client disconnect or early cancellation: signal completion with
        // whatever was captured so the pipeline still runs its bookkeeping
        // and partial bodies are never cached.
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn forwards_every_chunk_unchanged_and_in_order() {
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"hello ")), Ok(Bytes::from_static(b"world"))];
        let (capturing, rx) = CapturingStream::new(stream::iter(chunks), 1024);
        let collected: Vec<Bytes> = futures_util::StreamExt::collect::<Vec<_>>(capturing)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(collected, vec![Bytes::from_static(b"hello "), Bytes::from_static(b"world")]);

        let result = rx.await.unwrap();
        assert_eq!(result.body.unwrap(), b"hello world".to_vec());
        assert!(!result.truncated);
        assert_eq!(result.total_bytes, 11);
    }

    #[tokio::test]
    async fn stops_buffering_past_the_cap_but_keeps_streaming() {
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"0123456789")), Ok(Bytes::from_static(b"abcdefghij"))];
        let (capturing, rx) = CapturingStream::new(stream::iter(chunks), 15);
        let collected: Vec<Bytes> = futures_util::StreamExt::collect::<Vec<_>>(capturing)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(collected.len(), 2);

        let result = rx.await.unwrap();
        assert!(result.truncated);
        assert!(result.body.is_none());
        assert_eq!(result.total_bytes, 20);
    }

    #[tokio::test]
    async fn dropping_the_stream_early_still_fires_completion() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![Ok(Bytes::from_static(b"partial"))];
        let (capturing, rx) = CapturingStream::new(stream::iter(chunks), 1024);
        drop(capturing);
        let result = rx.await.unwrap();
        assert_eq!(result.total_bytes, 0);
    }
}
