//! # Worker Queues
//!
//! Execution contexts that run worker jobs. A FileTask never spawns anything
//! itself: the caller injects one queue for CPU-bound strategies and one for
//! I/O-bound strategies, each with its own concurrency bound.
//!
//! - `TaskQueue`: runs jobs on the tokio runtime, bounded by a semaphore.
//! - `ManualQueue`: stores jobs and runs them only when asked. Deterministic,
//!   used by tests and by hosts that drive their own event loop.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::debug;

/// A unit of work submitted to a queue
pub type Job = BoxFuture<'static, ()>;

/// Which execution context a strategy needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affinity {
    /// Recompression and transforms; parallelism bounded by core count
    Cpu,
    /// Reads, writes and renames that need exclusive file access
    Io,
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Io => write!(f, "io"),
        }
    }
}

/// Queue contract consumed by `FileTask::enqueue_workers`
pub trait WorkerQueue: Send + Sync {
    /// Schedule `job`. Must not block and must not run the job inline.
    fn submit(&self, job: Job, affinity: Affinity);
}

/// Bounded-concurrency queue on the tokio runtime
pub struct TaskQueue {
    name: String,
    semaphore: Arc<Semaphore>,
}

impl TaskQueue {
    /// Crea una coda con al massimo `max_concurrent` job in esecuzione.
    ///
    /// `submit` must be called from within a tokio runtime.
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let name = name.into();
        debug!("Queue '{}' allows {} concurrent jobs", name, max_concurrent);

        Self {
            name,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }
}

impl WorkerQueue for TaskQueue {
    fn submit(&self, job: Job, affinity: Affinity) {
        let semaphore = self.semaphore.clone();
        debug!("Queue '{}' accepted {} job", self.name, affinity);

        tokio::spawn(async move {
            // Permit is released automatically when the job finishes
            if let Ok(_permit) = semaphore.acquire_owned().await {
                job.await;
            }
        });
    }
}

/// Queue that only runs jobs when explicitly told to
#[derive(Default)]
pub struct ManualQueue {
    jobs: Mutex<VecDeque<(Affinity, Job)>>,
}

impl ManualQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, VecDeque<(Affinity, Job)>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    /// Affinities of the pending jobs, in submission order
    pub fn pending_affinities(&self) -> Vec<Affinity> {
        self.jobs().iter().map(|(affinity, _)| *affinity).collect()
    }

    /// Run the oldest pending job to completion. Returns false if none was pending.
    pub async fn run_next(&self) -> bool {
        let next = self.jobs().pop_front();
        match next {
            Some((_, job)) => {
                job.await;
                true
            }
            None => false,
        }
    }

    /// Run pending jobs until the queue is empty, returning how many ran
    pub async fn run_all(&self) -> usize {
        let mut count = 0;
        while self.run_next().await {
            count += 1;
        }
        count
    }

    /// Remove every pending job so the caller can run them in any order
    pub fn take_all(&self) -> Vec<Job> {
        self.jobs().drain(..).map(|(_, job)| job).collect()
    }
}

impl WorkerQueue for ManualQueue {
    fn submit(&self, job: Job, affinity: Affinity) {
        self.jobs().push_back((affinity, job));
    }
}
