//! Stream ingestor: turns an inference event stream into accumulated
//! snapshots for exactly one target slot.
//!
//! Each stream runs in its own tokio task and is the single producer of a
//! `watch` channel carrying the full accumulated text. Readers never wait on
//! the task; they read the latest snapshot. The task finalizes exactly once:
//! it hands the final text and outcome to `on_finish` (which persists), and
//! only then publishes the terminal snapshot with the outcome `on_finish`
//! reports back.

use std::pin::Pin;
use std::task::{Context, Poll};

use colloquy_types::llm::StreamEvent;
use colloquy_types::stream::{StreamOutcome, StreamSnapshot, StreamTarget, StreamUpdate};
use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

use crate::llm::provider::EventStream;

/// Live handle on a running stream.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    pub target: StreamTarget,
    pub receiver: watch::Receiver<StreamSnapshot>,
    pub cancel: CancellationToken,
}

impl StreamHandle {
    /// Latest accumulated content without waiting.
    pub fn snapshot(&self) -> StreamSnapshot {
        self.receiver.borrow().clone()
    }

    /// Stream whose drop before completion cancels the generation.
    pub fn subscribe(&self) -> ResponseStream {
        ResponseStream::new(
            self.target,
            self.receiver.clone(),
            Some(self.cancel.clone().drop_guard()),
        )
    }
}

/// Producer half of a stream, created before the task is started so the
/// handle can be registered first.
pub struct Ingest {
    target: StreamTarget,
    tx: watch::Sender<StreamSnapshot>,
    token: CancellationToken,
}

/// Create the channel for `target` without starting anything.
pub fn channel(target: StreamTarget) -> (StreamHandle, Ingest) {
    let (tx, rx) = watch::channel(StreamSnapshot::streaming(String::new()));
    let cancel = CancellationToken::new();
    let handle = StreamHandle {
        target,
        receiver: rx,
        cancel: cancel.clone(),
    };
    let ingest = Ingest {
        target,
        tx,
        token: cancel,
    };
    (handle, ingest)
}

impl Ingest {
    /// Spawn the ingesting task.
    ///
    /// `on_finish` receives the final text and outcome exactly once, after
    /// the source has been dropped and before the terminal snapshot is
    /// published. It returns the outcome to publish, which differs from the
    /// stream's own when the result could not be kept.
    pub fn run<F>(self, source: EventStream, on_finish: F)
    where
        F: FnOnce(String, StreamOutcome) -> BoxFuture<'static, StreamOutcome> + Send + 'static,
    {
        let Ingest { target, tx, token } = self;
        let span = tracing::info_span!(
            "response_stream",
            session_id = %target.session_id,
            message_id = %target.message_id,
            variant_id = ?target.variant_id,
        );

        tokio::spawn(
            async move {
                let mut source = source;
                let mut content = String::new();
                let mut chunks: u64 = 0;

                let outcome = loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break StreamOutcome::Cancelled,
                        event = source.next() => match event {
                            Some(Ok(StreamEvent::TextDelta { text })) => {
                                chunks += 1;
                                content.push_str(&text);
                                tx.send_replace(StreamSnapshot::streaming(content.clone()));
                            }
                            Some(Ok(StreamEvent::Connected)) => {}
                            Some(Ok(StreamEvent::Done)) | None => break StreamOutcome::Completed,
                            Some(Err(e)) => break StreamOutcome::Failed { error: e.to_string() },
                        },
                    }
                };
                drop(source);

                match &outcome {
                    StreamOutcome::Completed => {
                        tracing::debug!(chunks, chars = content.len(), "stream completed")
                    }
                    StreamOutcome::Failed { error } => {
                        tracing::warn!(chunks, error = %error, "stream failed")
                    }
                    StreamOutcome::Cancelled => tracing::info!(chunks, "stream cancelled"),
                }

                let outcome = on_finish(content.clone(), outcome).await;
                tx.send_replace(StreamSnapshot {
                    content,
                    outcome: Some(outcome),
                });
            }
            .instrument(span),
        );
    }
}

/// Lazy, finite stream of updates for one generation.
///
/// Yields a `Snapshot` whenever new text has accumulated (intermediate
/// snapshots may be skipped) and ends with exactly one terminal update.
pub struct ResponseStream {
    target: StreamTarget,
    inner: Pin<Box<dyn Stream<Item = StreamUpdate> + Send>>,
}

impl ResponseStream {
    fn new(
        target: StreamTarget,
        mut receiver: watch::Receiver<StreamSnapshot>,
        guard: Option<DropGuard>,
    ) -> Self {
        let inner = async_stream::stream! {
            let mut guard = guard;
            let mut last: Option<String> = None;
            loop {
                let snapshot = receiver.borrow_and_update().clone();
                if let Some(update) = StreamUpdate::terminal(&snapshot) {
                    if let Some(g) = guard.take() {
                        g.disarm();
                    }
                    yield update;
                    break;
                }
                if !snapshot.content.is_empty() && last.as_deref() != Some(snapshot.content.as_str()) {
                    last = Some(snapshot.content.clone());
                    yield StreamUpdate::Snapshot { content: snapshot.content };
                }
                if receiver.changed().await.is_err() {
                    // Producer vanished without a terminal snapshot.
                    let snapshot = receiver.borrow().clone();
                    yield StreamUpdate::terminal(&snapshot).unwrap_or(StreamUpdate::Failed {
                        content: snapshot.content,
                        error: "stream ended unexpectedly".to_string(),
                    });
                    break;
                }
            }
        };
        Self {
            target,
            inner: Box::pin(inner),
        }
    }

    pub fn target(&self) -> StreamTarget {
        self.target
    }

    /// Drain the stream and return its terminal update.
    pub async fn finish(mut self) -> Option<StreamUpdate> {
        let mut last = None;
        while let Some(update) = self.next().await {
            last = Some(update);
        }
        last.filter(StreamUpdate::is_terminal)
    }
}

impl Stream for ResponseStream {
    type Item = StreamUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use colloquy_types::llm::LlmError;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    type Finished = Arc<Mutex<Vec<(String, StreamOutcome)>>>;

    fn target() -> StreamTarget {
        StreamTarget {
            session_id: Uuid::now_v7(),
            message_id: Uuid::now_v7(),
            variant_id: None,
        }
    }

    fn recorder() -> (
        Finished,
        impl FnOnce(String, StreamOutcome) -> BoxFuture<'static, StreamOutcome> + Send + 'static,
    ) {
        let finished: Finished = Arc::default();
        let sink = Arc::clone(&finished);
        let on_finish = move |content: String, outcome: StreamOutcome| -> BoxFuture<'static, StreamOutcome> {
            Box::pin(async move {
                sink.lock().unwrap().push((content, outcome.clone()));
                outcome
            })
        };
        (finished, on_finish)
    }

    fn spawn<F>(target: StreamTarget, source: EventStream, on_finish: F) -> StreamHandle
    where
        F: FnOnce(String, StreamOutcome) -> BoxFuture<'static, StreamOutcome> + Send + 'static,
    {
        let (handle, ingest) = channel(target);
        ingest.run(source, on_finish);
        handle
    }

    /// Observer that leaves the generation running when dropped.
    fn follow(handle: &StreamHandle) -> ResponseStream {
        ResponseStream::new(handle.target, handle.receiver.clone(), None)
    }

    fn events(items: Vec<Result<StreamEvent, LlmError>>) -> EventStream {
        Box::pin(futures_util::stream::iter(items))
    }

    fn delta(text: &str) -> Result<StreamEvent, LlmError> {
        Ok(StreamEvent::TextDelta {
            text: text.to_string(),
        })
    }

    fn channel_source() -> (mpsc::UnboundedSender<Result<StreamEvent, LlmError>>, EventStream) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let source = async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        };
        (tx, Box::pin(source))
    }

    #[tokio::test]
    async fn test_chunks_accumulate_until_done() {
        let (finished, on_finish) = recorder();
        let handle = spawn(
            target(),
            events(vec![delta("Hi"), delta(" there"), Ok(StreamEvent::Done)]),
            on_finish,
        );

        let updates: Vec<StreamUpdate> = handle.subscribe().collect().await;
        assert_eq!(
            updates.last(),
            Some(&StreamUpdate::Completed {
                content: "Hi there".to_string()
            })
        );
        for update in &updates {
            assert!("Hi there".starts_with(update.content()));
        }

        let finished = finished.lock().unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0], ("Hi there".to_string(), StreamOutcome::Completed));
    }

    #[tokio::test]
    async fn test_source_closing_counts_as_completion() {
        let (finished, on_finish) = recorder();
        let handle = spawn(target(), events(vec![delta("A")]), on_finish);

        let last = handle.subscribe().finish().await.unwrap();
        assert_eq!(last, StreamUpdate::Completed { content: "A".to_string() });
        assert_eq!(finished.lock().unwrap()[0].1, StreamOutcome::Completed);
    }

    #[tokio::test]
    async fn test_error_keeps_partial_content() {
        let (finished, on_finish) = recorder();
        let handle = spawn(
            target(),
            events(vec![
                delta("Partial"),
                delta(" an"),
                Err(LlmError::Stream("connection reset".to_string())),
                delta("ignored"),
            ]),
            on_finish,
        );

        let last = handle.subscribe().finish().await.unwrap();
        match last {
            StreamUpdate::Failed { content, error } => {
                assert_eq!(content, "Partial an");
                assert!(error.contains("connection reset"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(finished.lock().unwrap()[0].0, "Partial an");
    }

    #[tokio::test]
    async fn test_cancel_persists_truncated_content() {
        let (finished, on_finish) = recorder();
        let (tx, source) = channel_source();
        let handle = spawn(target(), source, on_finish);

        tx.send(delta("Trunc")).unwrap();
        let mut rx = handle.receiver.clone();
        rx.wait_for(|s| s.content == "Trunc").await.unwrap();

        handle.cancel.cancel();
        let last = follow(&handle).finish().await.unwrap();
        assert_eq!(last, StreamUpdate::Cancelled { content: "Trunc".to_string() });
        assert_eq!(
            finished.lock().unwrap()[0],
            ("Trunc".to_string(), StreamOutcome::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_dropping_subscription_cancels() {
        let (finished, on_finish) = recorder();
        let (tx, source) = channel_source();
        let handle = spawn(target(), source, on_finish);

        let mut stream = handle.subscribe();
        tx.send(delta("Hel")).unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first, StreamUpdate::Snapshot { content: "Hel".to_string() });
        drop(stream);

        let mut rx = handle.receiver.clone();
        rx.wait_for(StreamSnapshot::is_finished).await.unwrap();
        assert_eq!(
            finished.lock().unwrap()[0],
            ("Hel".to_string(), StreamOutcome::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_dropping_follower_does_not_cancel() {
        let (finished, on_finish) = recorder();
        let (tx, source) = channel_source();
        let handle = spawn(target(), source, on_finish);

        drop(follow(&handle));
        tx.send(delta("still")).unwrap();
        tx.send(Ok(StreamEvent::Done)).unwrap();

        let last = follow(&handle).finish().await.unwrap();
        assert_eq!(last, StreamUpdate::Completed { content: "still".to_string() });
        assert_eq!(finished.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_published_after_finish_callback() {
        let (tx, source) = channel_source();
        let seen: Arc<Mutex<Option<bool>>> = Arc::default();
        let seen_in_cb = Arc::clone(&seen);
        let holder: Arc<Mutex<Option<watch::Receiver<StreamSnapshot>>>> = Arc::default();
        let holder_in_cb = Arc::clone(&holder);

        let handle = spawn(target(), source, move |_content, outcome| {
            Box::pin(async move {
                let rx = holder_in_cb.lock().unwrap().clone();
                let finished = rx.map(|rx| rx.borrow().is_finished());
                *seen_in_cb.lock().unwrap() = finished;
                outcome
            })
        });
        *holder.lock().unwrap() = Some(handle.receiver.clone());

        tx.send(Ok(StreamEvent::Done)).unwrap();
        follow(&handle).finish().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_finish_callback_decides_published_outcome() {
        let handle = spawn(
            target(),
            events(vec![delta("Lost"), Ok(StreamEvent::Done)]),
            |_content, _outcome| {
                Box::pin(async {
                    StreamOutcome::Failed {
                        error: "response could not be saved".to_string(),
                    }
                })
            },
        );

        let last = follow(&handle).finish().await.unwrap();
        assert_eq!(
            last,
            StreamUpdate::Failed {
                content: "Lost".to_string(),
                error: "response could not be saved".to_string(),
            }
        );
    }
}
