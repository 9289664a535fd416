//! Streaming client for the inference backend.
//!
//! The backend exposes an OpenAI-style `/v1/chat/completions` endpoint whose
//! streaming body is newline-delimited SSE: `data: {json}` records carrying
//! a message delta and a `done` flag, terminated by `done: true` or a
//! literal `data: [DONE]`. The call is made with no client-side timeout so
//! long generations are never truncated.

use bytes::Bytes;
use futures::stream::{BoxStream, Fuse};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;

/// Errors from the upstream streaming call.
#[derive(Debug, Clone)]
pub enum UpstreamError {
    /// Non-success HTTP status before any record was read.
    Status(u16),
    /// Connection or mid-stream transport failure.
    Network(String),
    /// A record failed to parse.
    Decode(String),
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(code) => write!(f, "upstream status: {}", code),
            Self::Network(msg) => write!(f, "upstream request error: {}", msg),
            Self::Decode(msg) => write!(f, "decode error: {}", msg),
        }
    }
}

impl std::error::Error for UpstreamError {}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

/// One streamed record from the inference backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamRecord {
    #[serde(default)]
    pub message: UpstreamMessage,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
}

/// HTTP client for the inference backend.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    /// The client carries no timeout: generation length is unbounded.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Open a streaming chat call and return a record reader.
    ///
    /// Options are merged into the top level of the request body, the shape
    /// the backend expects.
    ///
    /// # Errors
    /// Fails on connection errors and non-success statuses; mid-stream
    /// failures surface through [`RecordStream::next_record`].
    pub async fn chat_stream(
        &self,
        model: &str,
        messages: &[Value],
        options: &Map<String, Value>,
    ) -> Result<RecordStream, UpstreamError> {
        let mut body = Map::new();
        body.insert("model".to_string(), Value::from(model));
        body.insert("stream".to_string(), Value::Bool(true));
        if !messages.is_empty() {
            body.insert("messages".to_string(), Value::Array(messages.to_vec()));
        }
        for (key, value) in options {
            body.insert(key.clone(), value.clone());
        }

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&Value::Object(body))
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        Ok(RecordStream::new(response.bytes_stream().boxed()))
    }
}

/// Incremental reader over a newline-delimited SSE body.
pub struct RecordStream {
    body: Fuse<BoxStream<'static, reqwest::Result<Bytes>>>,
    buf: String,
    lines: VecDeque<String>,
    finished: bool,
}

impl RecordStream {
    fn new(body: BoxStream<'static, reqwest::Result<Bytes>>) -> Self {
        Self {
            body: body.fuse(),
            buf: String::new(),
            lines: VecDeque::new(),
            finished: false,
        }
    }

    /// The next parsed record.
    ///
    /// Returns `None` at end of stream (`[DONE]`, an empty data payload, or
    /// EOF). A decode or transport error ends the stream after being
    /// returned once.
    pub async fn next_record(&mut self) -> Option<Result<UpstreamRecord, UpstreamError>> {
        if self.finished {
            return None;
        }
        loop {
            while let Some(line) = self.lines.pop_front() {
                let Some(payload) = sse_data_payload(&line) else {
                    continue;
                };
                if payload.is_empty() || payload == "[DONE]" {
                    self.finished = true;
                    return None;
                }
                return match serde_json::from_str::<UpstreamRecord>(payload) {
                    Ok(record) => Some(Ok(record)),
                    Err(e) => {
                        self.finished = true;
                        Some(Err(UpstreamError::Decode(e.to_string())))
                    }
                };
            }
            match self.body.next().await {
                Some(Ok(bytes)) => self.push_bytes(&bytes),
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(UpstreamError::Network(e.to_string())));
                }
                None => {
                    if self.buf.is_empty() {
                        self.finished = true;
                        return None;
                    }
                    // Flush a trailing record that had no final newline.
                    let line = std::mem::take(&mut self.buf);
                    self.lines.push_back(line);
                }
            }
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.push_str(&String::from_utf8_lossy(bytes));
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            self.lines.push_back(line);
        }
    }
}

/// Extract the payload of a `data:` line; `None` for blanks and other
/// SSE fields.
fn sse_data_payload(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    line.strip_prefix("data:").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_data_payload() {
        assert_eq!(sse_data_payload(""), None);
        assert_eq!(sse_data_payload("   \r"), None);
        assert_eq!(sse_data_payload("event: ping"), None);
        assert_eq!(sse_data_payload("data: {\"done\":false}"), Some("{\"done\":false}"));
        assert_eq!(sse_data_payload("data: [DONE]"), Some("[DONE]"));
        assert_eq!(sse_data_payload("data:"), Some(""));
    }

    #[tokio::test]
    async fn test_record_stream_parses_and_terminates() {
        let body = "data: {\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n\
                    \n\
                    data: {\"message\":{\"content\":\"lo\"},\"done\":false}\n\
                    data: [DONE]\n";
        let stream =
            futures::stream::iter(vec![Ok(Bytes::from(body.to_string()))]).boxed();
        let mut records = RecordStream::new(stream);

        let first = records.next_record().await.unwrap().unwrap();
        assert_eq!(first.message.content, "Hel");
        assert!(!first.done);

        let second = records.next_record().await.unwrap().unwrap();
        assert_eq!(second.message.content, "lo");

        assert!(records.next_record().await.is_none());
        assert!(records.next_record().await.is_none());
    }

    #[tokio::test]
    async fn test_record_stream_handles_split_lines() {
        let parts = vec![
            Ok(Bytes::from_static(b"data: {\"message\":{\"conte")),
            Ok(Bytes::from_static(b"nt\":\"A\"},\"done\":true,\"done_reason\":\"length\"}\n")),
        ];
        let mut records = RecordStream::new(futures::stream::iter(parts).boxed());

        let record = records.next_record().await.unwrap().unwrap();
        assert_eq!(record.message.content, "A");
        assert!(record.done);
        assert_eq!(record.done_reason.as_deref(), Some("length"));
        assert!(records.next_record().await.is_none());
    }

    #[tokio::test]
    async fn test_record_stream_surfaces_decode_error() {
        let body = "data: {not json}\n";
        let mut records = RecordStream::new(
            futures::stream::iter(vec![Ok(Bytes::from(body.to_string()))]).boxed(),
        );
        let err = records.next_record().await.unwrap().unwrap_err();
        assert!(matches!(err, UpstreamError::Decode(_)));
        assert!(records.next_record().await.is_none());
    }

    #[tokio::test]
    async fn test_record_stream_flushes_trailing_line() {
        let body = "data: {\"message\":{\"content\":\"x\"},\"done\":true}";
        let mut records = RecordStream::new(
            futures::stream::iter(vec![Ok(Bytes::from(body.to_string()))]).boxed(),
        );
        let record = records.next_record().await.unwrap().unwrap();
        assert!(record.done);
        assert!(records.next_record().await.is_none());
    }
}
