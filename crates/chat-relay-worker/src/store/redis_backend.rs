//! Redis chunk store backend.
//!
//! Keyspace per job: `job:{id}:meta` (hash), `job:{id}:chunks` (list of
//! JSON-encoded chunks), `job:{id}:seq` (integer counter). All three keys
//! expire together once the job reaches a terminal state.

use super::{ChunkStore, StoreError, StoreResult};
use async_trait::async_trait;
use chat_relay_core::job::{Chunk, JobMeta, JobStatus};
use std::collections::HashMap;
use std::time::Duration;

/// Redis-backed store, shareable across worker replicas.
#[derive(Clone)]
pub struct RedisStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connect and verify the server answers `PING`.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Backend(format!("invalid redis url: {}", e)))?;
        let mut manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Backend(format!("redis connect failed: {}", e)))?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut manager)
            .await
            .map_err(|e| StoreError::Backend(format!("redis ping failed: {}", e)))?;
        Ok(Self { manager })
    }

    fn conn(&self) -> redis::aio::ConnectionManager {
        self.manager.clone()
    }
}

fn meta_key(job_id: &str) -> String {
    format!("job:{}:meta", job_id)
}

fn chunks_key(job_id: &str) -> String {
    format!("job:{}:chunks", job_id)
}

fn seq_key(job_id: &str) -> String {
    format!("job:{}:seq", job_id)
}

fn backend_err(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl ChunkStore for RedisStore {
    async fn create_job(&self, job_id: &str, meta: &JobMeta) -> StoreResult<()> {
        let mut conn = self.conn();
        let key = meta_key(job_id);

        // The status field doubles as the existence guard.
        let created: i64 = redis::cmd("HSETNX")
            .arg(&key)
            .arg("status")
            .arg(meta.status.as_str())
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        if created == 0 {
            return Err(StoreError::AlreadyExists(job_id.to_string()));
        }

        let messages = serde_json::to_string(&meta.messages)
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        let options = serde_json::to_string(&meta.options)
            .map_err(|e| StoreError::Codec(e.to_string()))?;

        redis::cmd("HSET")
            .arg(&key)
            .arg("model")
            .arg(&meta.model)
            .arg("created_at")
            .arg(&meta.created_at)
            .arg("messages")
            .arg(messages)
            .arg("options")
            .arg(options)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn get_meta(&self, job_id: &str) -> StoreResult<JobMeta> {
        let mut conn = self.conn();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(meta_key(job_id))
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        if fields.is_empty() {
            return Err(StoreError::NotFound(job_id.to_string()));
        }

        let status = fields
            .get("status")
            .and_then(|s| JobStatus::parse(s))
            .ok_or_else(|| StoreError::Codec(format!("bad status for job {}", job_id)))?;
        let messages = fields
            .get("messages")
            .map(|raw| serde_json::from_str(raw).map_err(|e| StoreError::Codec(e.to_string())))
            .transpose()?
            .unwrap_or_default();
        let options = fields
            .get("options")
            .map(|raw| serde_json::from_str(raw).map_err(|e| StoreError::Codec(e.to_string())))
            .transpose()?
            .unwrap_or_default();

        Ok(JobMeta {
            status,
            model: fields.get("model").cloned().unwrap_or_default(),
            created_at: fields.get("created_at").cloned().unwrap_or_default(),
            completed_at: fields.get("completed_at").cloned().filter(|s| !s.is_empty()),
            error: fields.get("error").cloned().filter(|s| !s.is_empty()),
            messages,
            options,
        })
    }

    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        completed_at: Option<&str>,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(meta_key(job_id)).arg("status").arg(status.as_str());
        if let Some(at) = completed_at {
            cmd.arg("completed_at").arg(at);
        }
        if let Some(err) = error {
            cmd.arg("error").arg(err);
        }
        cmd.query_async::<_, ()>(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn append_chunk(&self, job_id: &str, chunk: &Chunk) -> StoreResult<()> {
        let payload =
            serde_json::to_string(chunk).map_err(|e| StoreError::Codec(e.to_string()))?;
        let mut conn = self.conn();
        redis::cmd("RPUSH")
            .arg(chunks_key(job_id))
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn read_chunks(
        &self,
        job_id: &str,
        after_seq: i64,
        max: usize,
    ) -> StoreResult<Vec<Chunk>> {
        // seq is dense from 1, so the chunk with seq s sits at list index
        // s - 1 and the range read needs no full scan.
        let start = after_seq.max(0);
        let stop = start + max as i64 - 1;
        let mut conn = self.conn();
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(chunks_key(job_id))
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;

        let mut chunks = Vec::with_capacity(raw.len());
        for item in raw {
            let chunk: Chunk =
                serde_json::from_str(&item).map_err(|e| StoreError::Codec(e.to_string()))?;
            if chunk.seq > after_seq {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    async fn next_seq(&self, job_id: &str) -> StoreResult<i64> {
        let mut conn = self.conn();
        redis::cmd("INCR")
            .arg(seq_key(job_id))
            .query_async(&mut conn)
            .await
            .map_err(backend_err)
    }

    async fn set_ttl(&self, job_id: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn();
        let secs = ttl.as_secs().max(1) as i64;
        for key in [meta_key(job_id), chunks_key(job_id), seq_key(job_id)] {
            redis::cmd("EXPIRE")
                .arg(&key)
                .arg(secs)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(backend_err)?;
        }
        Ok(())
    }

    async fn list_jobs(&self) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut ids = Vec::new();
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg("job:*:meta")
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(backend_err)?;
            for key in keys {
                if let Some(id) = key
                    .strip_prefix("job:")
                    .and_then(|rest| rest.strip_suffix(":meta"))
                {
                    ids.push(id.to_string());
                }
            }
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(ids)
    }
}
