//! In-memory chunk store backend.

use super::{ChunkStore, StoreError, StoreResult};
use async_trait::async_trait;
use chat_relay_core::job::{Chunk, JobMeta, JobStatus};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

struct JobEntry {
    meta: JobMeta,
    chunks: Vec<Chunk>,
    seq: i64,
    expires_at: Option<Instant>,
}

/// Process-local store obeying the same semantics as the Redis backend.
///
/// Expiry is honored lazily: expired jobs are dropped on the next access.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    jobs: Arc<RwLock<HashMap<String, JobEntry>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.jobs
            .write()
            .retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn create_job(&self, job_id: &str, meta: &JobMeta) -> StoreResult<()> {
        self.purge_expired();
        let mut jobs = self.jobs.write();
        if jobs.contains_key(job_id) {
            return Err(StoreError::AlreadyExists(job_id.to_string()));
        }
        jobs.insert(
            job_id.to_string(),
            JobEntry {
                meta: meta.clone(),
                chunks: Vec::new(),
                seq: 0,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn get_meta(&self, job_id: &str) -> StoreResult<JobMeta> {
        self.purge_expired();
        let jobs = self.jobs.read();
        jobs.get(job_id)
            .map(|entry| entry.meta.clone())
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
    }

    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        completed_at: Option<&str>,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let mut jobs = self.jobs.write();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        entry.meta.status = status;
        if let Some(at) = completed_at {
            entry.meta.completed_at = Some(at.to_string());
        }
        if let Some(err) = error {
            entry.meta.error = Some(err.to_string());
        }
        Ok(())
    }

    async fn append_chunk(&self, job_id: &str, chunk: &Chunk) -> StoreResult<()> {
        let mut jobs = self.jobs.write();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        entry.chunks.push(chunk.clone());
        Ok(())
    }

    async fn read_chunks(
        &self,
        job_id: &str,
        after_seq: i64,
        max: usize,
    ) -> StoreResult<Vec<Chunk>> {
        self.purge_expired();
        let jobs = self.jobs.read();
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        Ok(entry
            .chunks
            .iter()
            .filter(|c| c.seq > after_seq)
            .take(max)
            .cloned()
            .collect())
    }

    async fn next_seq(&self, job_id: &str) -> StoreResult<i64> {
        let mut jobs = self.jobs.write();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        entry.seq += 1;
        Ok(entry.seq)
    }

    async fn set_ttl(&self, job_id: &str, ttl: Duration) -> StoreResult<()> {
        let mut jobs = self.jobs.write();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(())
    }

    async fn list_jobs(&self) -> StoreResult<Vec<String>> {
        self.purge_expired();
        Ok(self.jobs.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn meta() -> JobMeta {
        JobMeta::queued("test-model".to_string(), vec![], Map::new())
    }

    #[tokio::test]
    async fn test_create_is_exclusive() {
        let store = InMemoryStore::new();
        store.create_job("a", &meta()).await.unwrap();
        let err = store.create_job("a", &meta()).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_sequence_is_dense_from_one() {
        let store = InMemoryStore::new();
        store.create_job("a", &meta()).await.unwrap();
        for expected in 1..=5 {
            let seq = store.next_seq("a").await.unwrap();
            assert_eq!(seq, expected);
            store
                .append_chunk("a", &Chunk::content(seq, format!("c{}", seq)))
                .await
                .unwrap();
        }
        let chunks = store.read_chunks("a", 0, 1000).await.unwrap();
        let seqs: Vec<i64> = chunks.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_read_chunks_respects_cursor_and_cap() {
        let store = InMemoryStore::new();
        store.create_job("a", &meta()).await.unwrap();
        for _ in 0..10 {
            let seq = store.next_seq("a").await.unwrap();
            store
                .append_chunk("a", &Chunk::content(seq, String::new()))
                .await
                .unwrap();
        }
        let chunks = store.read_chunks("a", 4, 3).await.unwrap();
        let seqs: Vec<i64> = chunks.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![5, 6, 7]);
        // never returns a chunk at or below the cursor
        assert!(store
            .read_chunks("a", 10, 1000)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_status_update_is_partial() {
        let store = InMemoryStore::new();
        store.create_job("a", &meta()).await.unwrap();
        store
            .update_status("a", JobStatus::Running, None, None)
            .await
            .unwrap();
        let m = store.get_meta("a").await.unwrap();
        assert_eq!(m.status, JobStatus::Running);
        assert!(m.completed_at.is_none());

        store
            .update_status("a", JobStatus::Failed, Some("2026-01-01T00:00:00Z"), Some("boom"))
            .await
            .unwrap();
        let m = store.get_meta("a").await.unwrap();
        assert_eq!(m.status, JobStatus::Failed);
        assert_eq!(m.completed_at.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert_eq!(m.error.as_deref(), Some("boom"));
        // model survives partial updates
        assert_eq!(m.model, "test-model");
    }

    #[tokio::test]
    async fn test_ttl_expires_all_job_state() {
        let store = InMemoryStore::new();
        store.create_job("a", &meta()).await.unwrap();
        let seq = store.next_seq("a").await.unwrap();
        store
            .append_chunk("a", &Chunk::content(seq, "x".to_string()))
            .await
            .unwrap();
        store
            .set_ttl("a", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(
            store.get_meta("a").await.unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert!(store.list_jobs().await.unwrap().is_empty());
    }
}
