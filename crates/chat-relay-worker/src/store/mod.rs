//! Chunk store abstraction and backends.
//!
//! The store is the only cross-process shared state in the system: job
//! metadata, the ordered chunk log and the per-job sequence counter all live
//! here so any worker replica (and, through the worker API, the gateway) can
//! observe a job's progress. Two backends implement the same trait:
//! Redis for deployments and an in-memory store for tests and
//! single-process runs.

mod memory;
mod redis_backend;

pub use memory::InMemoryStore;
pub use redis_backend::RedisStore;

use async_trait::async_trait;
use chat_relay_core::job::{Chunk, JobMeta, JobStatus};
use std::time::Duration;

/// Errors surfaced by chunk store operations.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// `create_job` with an id that already exists.
    AlreadyExists(String),
    /// The job id is unknown.
    NotFound(String),
    /// A backend (connection, command) failure.
    Backend(String),
    /// A stored value failed to round-trip through JSON.
    Codec(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyExists(id) => write!(f, "job {} already exists", id),
            Self::NotFound(id) => write!(f, "job {} not found", id),
            Self::Backend(msg) => write!(f, "store backend error: {}", msg),
            Self::Codec(msg) => write!(f, "store codec error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable, shareable per-job state.
///
/// Contract highlights:
/// - chunk `seq` values are dense from 1 and appended in order, so
///   `read_chunks` can be answered with an indexed range;
/// - `next_seq` is linearizable per job;
/// - `set_ttl` expires all of a job's keys as a group and is called once,
///   when the job reaches a terminal state.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Create a job's metadata. Fails with [`StoreError::AlreadyExists`] if
    /// the id is taken.
    async fn create_job(&self, job_id: &str, meta: &JobMeta) -> StoreResult<()>;

    /// Fetch a job's metadata.
    async fn get_meta(&self, job_id: &str) -> StoreResult<JobMeta>;

    /// Partially update status and terminal fields. Last-writer-wins is
    /// acceptable: only the executor writes terminal fields for a job it
    /// owns.
    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        completed_at: Option<&str>,
        error: Option<&str>,
    ) -> StoreResult<()>;

    /// Append one chunk to the job's ordered log.
    async fn append_chunk(&self, job_id: &str, chunk: &Chunk) -> StoreResult<()>;

    /// All chunks with `seq > after_seq`, ascending, at most `max`.
    async fn read_chunks(&self, job_id: &str, after_seq: i64, max: usize)
        -> StoreResult<Vec<Chunk>>;

    /// Atomic fetch-and-add on the job's sequence counter; returns the new
    /// value, which becomes the next chunk's `seq`.
    async fn next_seq(&self, job_id: &str) -> StoreResult<i64>;

    /// Expire all of the job's keys after `ttl`.
    async fn set_ttl(&self, job_id: &str, ttl: Duration) -> StoreResult<()>;

    /// Enumerate known job ids (startup sweep).
    async fn list_jobs(&self) -> StoreResult<Vec<String>>;
}
