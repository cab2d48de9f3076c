use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info_span, Instrument};

/// A unit of work executed by a [`WorkerPool`].
#[async_trait::async_trait]
pub trait Job: Send + 'static {
    /// Describes the job in logs.
    fn name(&self) -> String;

    /// Determines the worker that runs the job. Jobs with equal hashes run on the same worker, in
    /// submission order.
    fn hash(&self) -> u64;

    async fn run(self: Box<Self>);
}

/// A fixed set of workers, each draining its own bounded queue.
///
/// A job is routed to worker `hash % workers`, so jobs with the same hash never run concurrently
/// and complete in the order they were submitted. Jobs with different hashes may run in parallel.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    queues: Arc<[mpsc::Sender<Box<dyn Job>>]>,
}

#[derive(Copy, Clone, Debug, thiserror::Error)]
#[error("worker pool is closed")]
pub struct PoolClosed(());

// === impl WorkerPool ===

impl WorkerPool {
    /// Spawns `workers` worker tasks on the current runtime, each with a queue of `capacity` jobs.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let queues = (0..workers)
            .map(|id| {
                let (tx, rx) = mpsc::channel(capacity);
                tokio::spawn(work(rx).instrument(info_span!("worker", id)));
                tx
            })
            .collect::<Vec<_>>();
        tracing::debug!(workers, capacity, "Started worker pool");
        Self {
            queues: queues.into(),
        }
    }

    pub fn workers(&self) -> usize {
        self.queues.len()
    }

    /// The index of the worker that runs jobs with the given hash.
    pub fn worker_for(&self, hash: u64) -> usize {
        (hash % self.queues.len() as u64) as usize
    }

    /// Enqueues a job, waiting for space in its worker's queue.
    pub async fn submit(&self, job: Box<dyn Job>) -> Result<(), PoolClosed> {
        let worker = self.worker_for(job.hash());
        tracing::trace!(job = %job.name(), worker, "Submitting");
        self.queues[worker]
            .send(job)
            .await
            .map_err(|_| PoolClosed(()))
    }
}

async fn work(mut jobs: mpsc::Receiver<Box<dyn Job>>) {
    while let Some(job) = jobs.recv().await {
        let name = job.name();
        tracing::trace!(job = %name, "Running");
        // Each job runs on its own task so that a panic is isolated from the worker. The worker
        // waits for it to complete before taking the next job.
        if let Err(error) = tokio::spawn(job.run()).await {
            tracing::error!(job = %name, %error, "Job failed");
        }
    }
    tracing::debug!("Worker queue closed");
}
