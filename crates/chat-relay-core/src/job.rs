//! Job and chunk data model plus the worker wire contracts.
//!
//! A job is one client chat-completion request materialized as worker-side
//! state; a chunk is one ordered increment of model output. Chunks carry a
//! per-job sequence number that is dense from 1, which is what lets the
//! gateway resume a stream from any point with a single cursor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether this state admits no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Wire representation, also used as the Redis hash field value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted per-job metadata.
///
/// Messages and options are kept verbatim as JSON so arbitrary backend
/// fields pass through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMeta {
    pub status: JobStatus,
    pub model: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// RFC 3339 terminal timestamp, set once the job leaves `running`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl JobMeta {
    /// Metadata for a freshly created job.
    #[must_use]
    pub fn queued(model: String, messages: Vec<Value>, options: Map<String, Value>) -> Self {
        Self {
            status: JobStatus::Queued,
            model,
            created_at: now_rfc3339(),
            completed_at: None,
            error: None,
            messages,
            options,
        }
    }
}

/// One increment of model output in a job's chunk log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Dense per-job sequence number, starting at 1.
    pub seq: i64,
    /// Incremental output text; may be empty on the terminating chunk.
    #[serde(default)]
    pub delta: String,
    /// True on the final chunk of the log.
    #[serde(default)]
    pub done: bool,
    /// `stop`, `length` or `error`; present only when `done` is true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Failure description; present only on failure-terminating chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Chunk {
    /// An intermediate content chunk.
    #[must_use]
    pub fn content(seq: i64, delta: String) -> Self {
        Self {
            seq,
            delta,
            done: false,
            finish_reason: None,
            error: None,
        }
    }

    /// The terminating chunk of a successful stream.
    #[must_use]
    pub fn terminal(seq: i64, delta: String, finish_reason: &str) -> Self {
        Self {
            seq,
            delta,
            done: true,
            finish_reason: Some(finish_reason.to_string()),
            error: None,
        }
    }

    /// A synthetic terminating chunk recording a failure.
    #[must_use]
    pub fn failure(seq: i64, error: impl Into<String>) -> Self {
        Self {
            seq,
            delta: String::new(),
            done: true,
            finish_reason: Some("error".to_string()),
            error: Some(error.into()),
        }
    }
}

/// Current UTC time as an RFC 3339 string, the format of all job timestamps.
#[must_use]
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ============================================================================
// Worker wire contracts
// ============================================================================

/// Body of `POST /jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreateRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

/// Response of `POST /jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreateResponse {
    pub job_id: String,
    pub status: JobStatus,
}

/// Response of `GET /jobs/{id}/events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEventsResponse {
    pub status: JobStatus,
    pub chunks: Vec<Chunk>,
}

/// Response of `GET /jobs/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response of `GET /stats`: load as seen by the admission controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs currently executing.
    pub active: usize,
    /// Jobs accepted but not yet executing.
    pub queued: usize,
    /// Configured executor concurrency (N).
    pub capacity: usize,
    /// Hard admission ceiling (2N).
    pub max_queue: usize,
}
