use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::jobs::Job;

/// Fixed-size pool of workers executing jobs from a shared channel.
///
/// Execution is simulated: a worker sleeps for the job's duration, then
/// posts the job id to the completion channel. Free capacity is
/// `workers - running`; jobs queued in the channel beyond that are
/// backlog and do not count as running.
pub struct WorkerPool {
    tx: mpsc::UnboundedSender<Job>,
    running: Arc<AtomicUsize>,
    workers: usize,
}

impl WorkerPool {
    /// Spawn `workers` worker tasks. Returns the pool handle and the
    /// channel on which completed job ids arrive.
    pub fn new(workers: usize) -> (Self, mpsc::UnboundedReceiver<i64>) {
        let (job_tx, job_rx) = mpsc::unbounded_channel::<Job>();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicUsize::new(0));
        let job_rx = Arc::new(Mutex::new(job_rx));

        for worker in 0..workers {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            let running = running.clone();
            tokio::spawn(async move {
                loop {
                    // One waiter holds the lock until a job arrives;
                    // the next worker takes over as soon as it releases.
                    let job = {
                        let mut rx = job_rx.lock().await;
                        match rx.recv().await {
                            Some(job) => job,
                            None => return,
                        }
                    };

                    running.fetch_add(1, Ordering::SeqCst);
                    tracing::debug!(worker, job_id = job.id, secs = job.duration_secs, "Job started");
                    tokio::time::sleep(Duration::from_secs(job.duration_secs)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    tracing::debug!(worker, job_id = job.id, "Job finished");

                    if done_tx.send(job.id).is_err() {
                        return;
                    }
                }
            });
        }

        (
            Self {
                tx: job_tx,
                running,
                workers,
            },
            done_rx,
        )
    }

    pub fn submit(&self, job: Job) {
        let _ = self.tx.send(job);
    }

    pub fn capacity(&self) -> usize {
        self.workers
            .saturating_sub(self.running.load(Ordering::SeqCst))
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}
