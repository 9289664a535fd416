//! Admission control for the executor pool.
//!
//! The controller bounds total load at `2 * N` (active plus queued) and
//! rejects everything beyond that with an overload error, which the HTTP
//! surface turns into a 429. There is no queue-wait: a job is either
//! accepted and processing, or rejected fast.

use chat_relay_core::job::QueueStats;
use parking_lot::Mutex;
use std::sync::Arc;

/// Errors that can occur when admitting jobs.
#[derive(Debug, Clone)]
pub enum AdmissionError {
    /// Load ceiling reached; retry later.
    Overloaded {
        active: usize,
        queued: usize,
        limit: usize,
    },
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overloaded {
                active,
                queued,
                limit,
            } => write!(
                f,
                "queue full: active={}, queued={}, max={}",
                active, queued, limit
            ),
        }
    }
}

impl std::error::Error for AdmissionError {}

#[derive(Default)]
struct Load {
    active: usize,
    queued: usize,
}

/// Non-blocking admission over a bounded FIFO of job ids.
#[derive(Clone)]
pub struct AdmissionController {
    load: Arc<Mutex<Load>>,
    tx: flume::Sender<String>,
    concurrency: usize,
    max_load: usize,
}

impl AdmissionController {
    /// Create the controller and the receiving end of the job FIFO.
    ///
    /// The FIFO capacity equals the admission ceiling, so an accepted job
    /// always fits without blocking the caller.
    #[must_use]
    pub fn new(concurrency: usize) -> (Self, flume::Receiver<String>) {
        let max_load = concurrency * 2;
        let (tx, rx) = flume::bounded(max_load);
        (
            Self {
                load: Arc::new(Mutex::new(Load::default())),
                tx,
                concurrency,
                max_load,
            },
            rx,
        )
    }

    /// Hand a job to the executor pool, or fail fast when at the ceiling.
    pub fn enqueue(&self, job_id: String) -> Result<(), AdmissionError> {
        let mut load = self.load.lock();
        if load.active + load.queued >= self.max_load {
            return Err(AdmissionError::Overloaded {
                active: load.active,
                queued: load.queued,
                limit: self.max_load,
            });
        }
        // Capacity is guaranteed by the counter check above.
        self.tx
            .try_send(job_id)
            .map_err(|_| AdmissionError::Overloaded {
                active: load.active,
                queued: load.queued,
                limit: self.max_load,
            })?;
        load.queued += 1;
        Ok(())
    }

    /// Called by an executor when it dequeues a job.
    pub fn mark_running(&self) {
        let mut load = self.load.lock();
        load.queued = load.queued.saturating_sub(1);
        load.active += 1;
    }

    /// Called by an executor when it finishes a job, however it ended.
    pub fn mark_finished(&self) {
        let mut load = self.load.lock();
        load.active = load.active.saturating_sub(1);
    }

    /// Current load snapshot.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let load = self.load.lock();
        QueueStats {
            active: load.active,
            queued: load.queued,
            capacity: self.concurrency,
            max_queue: self.max_load,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_above_ceiling() {
        let (admission, _rx) = AdmissionController::new(2);
        for i in 0..4 {
            admission.enqueue(format!("job-{}", i)).unwrap();
        }
        let err = admission.enqueue("job-4".to_string()).unwrap_err();
        assert!(matches!(err, AdmissionError::Overloaded { limit: 4, .. }));
    }

    #[test]
    fn test_running_jobs_count_toward_ceiling() {
        let (admission, rx) = AdmissionController::new(2);
        for i in 0..4 {
            admission.enqueue(format!("job-{}", i)).unwrap();
        }
        // Two jobs start executing; the ceiling covers active + queued.
        for _ in 0..2 {
            rx.try_recv().unwrap();
            admission.mark_running();
        }
        let stats = admission.stats();
        assert_eq!(stats.active, 2);
        assert_eq!(stats.queued, 2);
        assert!(admission.enqueue("job-5".to_string()).is_err());

        // Finishing one frees one slot.
        admission.mark_finished();
        admission.enqueue("job-5".to_string()).unwrap();
    }

    #[test]
    fn test_load_invariant_under_interleavings() {
        let (admission, rx) = AdmissionController::new(3);
        let limit = 6;
        let mut accepted = 0usize;

        // Arbitrary interleaving of enqueue / dequeue / finish; the
        // invariant active + queued <= 2N must hold at every step.
        for round in 0..200 {
            match round % 5 {
                0 | 1 | 2 => {
                    if admission.enqueue(format!("job-{}", round)).is_ok() {
                        accepted += 1;
                    }
                }
                3 => {
                    if rx.try_recv().is_ok() {
                        admission.mark_running();
                    }
                }
                _ => {
                    if admission.stats().active > 0 {
                        admission.mark_finished();
                    }
                }
            }
            let stats = admission.stats();
            assert!(stats.active + stats.queued <= limit);
            assert!(stats.active <= limit);
        }
        assert!(accepted > 0);
    }

    #[test]
    fn test_stats_shape() {
        let (admission, _rx) = AdmissionController::new(10);
        let stats = admission.stats();
        assert_eq!(stats.capacity, 10);
        assert_eq!(stats.max_queue, 20);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queued, 0);
    }
}
