//! Executor pool: N long-lived tasks that consume queued jobs and drive one
//! upstream streaming call each, appending chunks to the store as records
//! arrive.
//!
//! A single executor owns a given job for its whole life, which is what
//! makes per-job chunk order and dense sequence numbers trivial: there is
//! never a second writer.

use crate::admission::AdmissionController;
use crate::cancel::CancelRegistry;
use crate::store::ChunkStore;
use crate::upstream::UpstreamClient;
use chat_relay_core::job::{now_rfc3339, Chunk, JobStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Per-executor context: everything needed to run one job to completion.
#[derive(Clone)]
pub struct Executor {
    store: Arc<dyn ChunkStore>,
    cancels: CancelRegistry,
    upstream: UpstreamClient,
    job_ttl: Duration,
}

impl Executor {
    #[must_use]
    pub fn new(
        store: Arc<dyn ChunkStore>,
        cancels: CancelRegistry,
        upstream: UpstreamClient,
        job_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cancels,
            upstream,
            job_ttl,
        }
    }

    /// Run one job to a terminal state.
    pub async fn process_job(&self, job_id: &str) {
        let meta = match self.store.get_meta(job_id).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "failed to load job meta, abandoning");
                return;
            }
        };

        match meta.status {
            JobStatus::Queued => {}
            // Cancelled while still queued: terminate the log without
            // touching the upstream.
            JobStatus::Cancelled => {
                self.finish(job_id, JobStatus::Cancelled, "cancelled").await;
                return;
            }
            other => {
                warn!(job_id = %job_id, status = %other, "job not queued at dequeue, abandoning");
                return;
            }
        }

        if let Err(e) = self
            .store
            .update_status(job_id, JobStatus::Running, None, None)
            .await
        {
            error!(job_id = %job_id, error = %e, "failed to mark job running, abandoning");
            return;
        }

        let mut records = match self
            .upstream
            .chat_stream(&meta.model, &meta.messages, &meta.options)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                self.finish(job_id, JobStatus::Failed, &e.to_string()).await;
                return;
            }
        };

        while let Some(result) = records.next_record().await {
            // Cancellation is observed between records; at most one extra
            // record of upstream output is discarded.
            if self.cancels.is_cancelled(job_id) {
                self.finish(job_id, JobStatus::Cancelled, "cancelled").await;
                return;
            }

            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    self.finish(job_id, JobStatus::Failed, &e.to_string()).await;
                    return;
                }
            };

            let seq = match self.store.next_seq(job_id).await {
                Ok(seq) => seq,
                Err(e) => {
                    // Without a sequence number the log cannot stay dense;
                    // give up on the job rather than leave a gap.
                    error!(job_id = %job_id, error = %e, "sequence counter failure");
                    let _ = self
                        .store
                        .update_status(
                            job_id,
                            JobStatus::Failed,
                            Some(&now_rfc3339()),
                            Some(&e.to_string()),
                        )
                        .await;
                    self.apply_ttl(job_id).await;
                    return;
                }
            };

            let done = record.done;
            let chunk = if done {
                let reason = if record.done_reason.as_deref() == Some("length") {
                    "length"
                } else {
                    "stop"
                };
                Chunk::terminal(seq, record.message.content, reason)
            } else {
                Chunk::content(seq, record.message.content)
            };

            if let Err(e) = self.store.append_chunk(job_id, &chunk).await {
                warn!(job_id = %job_id, seq, error = %e, "failed to append chunk");
            }

            if done {
                break;
            }
        }

        if let Err(e) = self
            .store
            .update_status(job_id, JobStatus::Completed, Some(&now_rfc3339()), None)
            .await
        {
            warn!(job_id = %job_id, error = %e, "failed to mark job completed");
        }
        self.apply_ttl(job_id).await;
    }

    /// Terminate a job with a synthetic error chunk and the given terminal
    /// status (`failed`, or `cancelled` for the cancel path).
    async fn finish(&self, job_id: &str, status: JobStatus, error: &str) {
        match self.store.next_seq(job_id).await {
            Ok(seq) => {
                if let Err(e) = self
                    .store
                    .append_chunk(job_id, &Chunk::failure(seq, error))
                    .await
                {
                    warn!(job_id = %job_id, error = %e, "failed to append terminal chunk");
                }
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "failed to allocate terminal sequence");
            }
        }
        if let Err(e) = self
            .store
            .update_status(job_id, status, Some(&now_rfc3339()), Some(error))
            .await
        {
            warn!(job_id = %job_id, error = %e, "failed to record terminal status");
        }
        self.apply_ttl(job_id).await;
    }

    async fn apply_ttl(&self, job_id: &str) {
        if let Err(e) = self.store.set_ttl(job_id, self.job_ttl).await {
            warn!(job_id = %job_id, error = %e, "failed to set job TTL");
        }
    }
}

/// Pool of executors consuming the admission FIFO.
pub struct ExecutorPool {
    handles: Vec<JoinHandle<()>>,
}

impl ExecutorPool {
    /// Spawn `concurrency` executors.
    pub fn spawn(
        concurrency: usize,
        rx: flume::Receiver<String>,
        admission: AdmissionController,
        executor: Executor,
    ) -> Self {
        info!(
            "🏗️ EXECUTOR_POOL: spawning {} executors, admission ceiling {}",
            concurrency,
            concurrency * 2
        );
        let handles = (0..concurrency)
            .map(|executor_id| {
                let rx = rx.clone();
                let admission = admission.clone();
                let executor = executor.clone();
                tokio::spawn(async move {
                    while let Ok(job_id) = rx.recv_async().await {
                        admission.mark_running();
                        info!(executor_id, job_id = %job_id, "executing job");
                        executor.process_job(&job_id).await;
                        admission.mark_finished();
                    }
                })
            })
            .collect();
        Self { handles }
    }

    /// Number of executor tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Startup sweep: any job left `queued` or `running` by a previous process
/// is moved to `failed` with a synthetic terminal chunk, so pollers observe
/// a well-formed log instead of a stream that never ends.
pub async fn sweep_stale_jobs(store: &Arc<dyn ChunkStore>, job_ttl: Duration) -> usize {
    let ids = match store.list_jobs().await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "startup sweep could not list jobs");
            return 0;
        }
    };

    let mut swept = 0;
    for job_id in ids {
        let Ok(meta) = store.get_meta(&job_id).await else {
            continue;
        };
        if meta.status.is_terminal() {
            continue;
        }
        if let Ok(seq) = store.next_seq(&job_id).await {
            let _ = store
                .append_chunk(&job_id, &Chunk::failure(seq, "worker restarted"))
                .await;
        }
        let _ = store
            .update_status(
                &job_id,
                JobStatus::Failed,
                Some(&now_rfc3339()),
                Some("worker restarted"),
            )
            .await;
        let _ = store.set_ttl(&job_id, job_ttl).await;
        swept += 1;
    }

    if swept > 0 {
        warn!(swept, "swept non-terminal jobs to failed after restart");
    }
    swept
}
