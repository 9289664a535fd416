//! The resumable stream: a polling loop that reconstructs one uninterrupted
//! SSE stream (or one aggregated response) from possibly-interrupted event
//! polls against the worker.
//!
//! Resilience comes from two pieces working together. The worker keeps every
//! chunk in a durable, densely-sequenced log, so nothing is lost when a poll
//! fails; and the loop here keeps a `last_seq` cursor, so after any number
//! of retries each delta is forwarded exactly once.

use crate::client::{ClientError, WorkerClient};
use axum::response::sse::Event;
use chat_relay_core::config::GatewayConfig;
use chat_relay_core::job::JobStatus;
use chat_relay_core::openai::responses::{ChatCompletionChunk, ChatCompletionResponse, ErrorResponse};
use chat_relay_core::openai::created_time_secs;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// One event produced by the pump and consumed by the SSE adapter.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A translated chat-completion chunk frame.
    Chunk(ChatCompletionChunk),
    /// An SSE error frame; the stream ends after it.
    Error(String),
    /// The `data: [DONE]` terminator.
    Done,
}

#[derive(PartialEq)]
enum StreamerStatus {
    Open,
    Stopped,
}

/// Adapts the pump channel into the SSE body.
pub struct Streamer {
    rx: flume::r#async::RecvStream<'static, StreamEvent>,
    status: StreamerStatus,
}

impl Streamer {
    #[must_use]
    pub fn new(rx: flume::Receiver<StreamEvent>) -> Self {
        Self {
            rx: rx.into_stream(),
            status: StreamerStatus::Open,
        }
    }
}

impl Stream for Streamer {
    type Item = Result<Event, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.status == StreamerStatus::Stopped {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.rx).poll_next(cx) {
            Poll::Ready(Some(StreamEvent::Chunk(chunk))) => {
                Poll::Ready(Some(Event::default().json_data(chunk)))
            }
            Poll::Ready(Some(StreamEvent::Error(message))) => {
                self.status = StreamerStatus::Stopped;
                Poll::Ready(Some(Event::default().json_data(ErrorResponse::frame(message))))
            }
            Poll::Ready(Some(StreamEvent::Done)) => {
                self.status = StreamerStatus::Stopped;
                Poll::Ready(Some(Ok(Event::default().data("[DONE]"))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Exponential poll-retry backoff.
struct Backoff {
    current_ms: u64,
    init_ms: u64,
    max_ms: u64,
}

impl Backoff {
    fn new(init_ms: u64, max_ms: u64) -> Self {
        Self {
            current_ms: init_ms,
            init_ms,
            max_ms,
        }
    }

    async fn wait(&mut self) {
        tokio::time::sleep(Duration::from_millis(self.current_ms)).await;
        self.current_ms = (self.current_ms * 2).min(self.max_ms);
    }

    fn reset(&mut self) {
        self.current_ms = self.init_ms;
    }
}

/// Drive the resumable polling loop, emitting SSE events into `tx`.
///
/// Runs until the job terminates, the overall deadline passes, or the
/// client goes away (the send side fails). Poll failures never close the
/// stream; they only delay it.
pub async fn pump_job_stream(
    client: Arc<WorkerClient>,
    config: Arc<GatewayConfig>,
    job_id: String,
    model: String,
    tx: flume::Sender<StreamEvent>,
) {
    let chat_id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
    let created = created_time_secs();
    let deadline = Instant::now() + Duration::from_millis(config.job_timeout_ms);
    let mut last_seq: i64 = -1;
    let mut backoff = Backoff::new(config.retry_backoff_init_ms, config.retry_backoff_max_ms);

    loop {
        if Instant::now() >= deadline {
            let _ = tx.send_async(StreamEvent::Error("timeout exceeded".to_string())).await;
            return;
        }

        let events = match client.poll_events(&job_id, last_seq).await {
            Ok(events) => {
                backoff.reset();
                events
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "event poll failed, backing off");
                backoff.wait().await;
                continue;
            }
        };

        for chunk in events.chunks {
            // The cursor makes replays harmless: anything at or below it
            // has already been forwarded.
            if chunk.seq <= last_seq {
                continue;
            }
            last_seq = chunk.seq;

            if let Some(error) = chunk.error.filter(|e| !e.is_empty()) {
                let _ = tx.send_async(StreamEvent::Error(error)).await;
                return;
            }

            let content = if !chunk.delta.is_empty() {
                Some(chunk.delta)
            } else if chunk.done {
                Some(String::new())
            } else {
                None
            };
            let frame = ChatCompletionChunk::delta(
                chat_id.clone(),
                created,
                model.clone(),
                content,
                chunk.finish_reason,
            );
            if tx.send_async(StreamEvent::Chunk(frame)).await.is_err() {
                // Client disconnected. The worker job keeps running; TTL
                // cleans its state up.
                return;
            }

            if chunk.done {
                let _ = tx.send_async(StreamEvent::Done).await;
                return;
            }
        }

        match events.status {
            // Log ended without a done chunk: still terminate cleanly.
            JobStatus::Completed => {
                let _ = tx.send_async(StreamEvent::Done).await;
                return;
            }
            JobStatus::Failed => {
                let _ = tx.send_async(StreamEvent::Error("job failed".to_string())).await;
                return;
            }
            JobStatus::Cancelled => {
                let _ = tx.send_async(StreamEvent::Error("job cancelled".to_string())).await;
                return;
            }
            JobStatus::Queued | JobStatus::Running => {}
        }

        tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
    }
}

/// Failure modes of the non-streaming aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateError {
    /// Overall deadline passed (504).
    Timeout,
    /// The job failed, was cancelled, or wrote an error chunk (500).
    Failed(String),
}

/// The same polling loop, accumulated into a single completion envelope.
pub async fn collect_completion(
    client: Arc<WorkerClient>,
    config: Arc<GatewayConfig>,
    job_id: String,
    model: String,
) -> Result<ChatCompletionResponse, AggregateError> {
    let deadline = Instant::now() + Duration::from_millis(config.job_timeout_ms);
    let mut last_seq: i64 = -1;
    let mut backoff = Backoff::new(config.retry_backoff_init_ms, config.retry_backoff_max_ms);
    let mut content = String::new();
    let mut finish_reason: Option<String> = None;

    loop {
        if Instant::now() >= deadline {
            return Err(AggregateError::Timeout);
        }

        let events = match client.poll_events(&job_id, last_seq).await {
            Ok(events) => {
                backoff.reset();
                events
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "event poll failed, backing off");
                backoff.wait().await;
                continue;
            }
        };

        for chunk in events.chunks {
            if chunk.seq <= last_seq {
                continue;
            }
            last_seq = chunk.seq;

            if let Some(error) = chunk.error.filter(|e| !e.is_empty()) {
                return Err(AggregateError::Failed(error));
            }

            content.push_str(&chunk.delta);
            if chunk.done {
                finish_reason = chunk.finish_reason;
                break;
            }
        }

        match events.status {
            JobStatus::Completed => {
                return Ok(ChatCompletionResponse::single(
                    format!("chatcmpl-{}", uuid::Uuid::new_v4()),
                    created_time_secs(),
                    model,
                    content,
                    finish_reason,
                ));
            }
            JobStatus::Failed => return Err(AggregateError::Failed("job failed".to_string())),
            JobStatus::Cancelled => {
                return Err(AggregateError::Failed("job cancelled".to_string()))
            }
            JobStatus::Queued | JobStatus::Running => {}
        }

        tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
    }
}
