//! The single serialization point for replicated-state mutations.
//!
//! Handlers enqueue boxed async tasks; one runner loop drains them,
//! bracketing each drain in a cluster-wide mutex acquisition. Work is
//! batched per acquisition to amortize the mutex cost, but the hold
//! time is bounded by the slice so peers waiting on the section are not
//! starved.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{GridError, Result};
use crate::gs::mutex::MutexEngine;

pub type CsTask = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

const QUEUE_CAPACITY: usize = 100;

/// Producer half, cloned into every handler that mutates replicated
/// state.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<CsTask>,
}

impl TaskQueue {
    pub fn push(&self, task: CsTask) -> Result<()> {
        self.tx.try_send(task).map_err(|_| GridError::QueueFull)
    }
}

/// Consumer half: owns the mutex engine and the queue receiver.
pub struct CsRunner {
    rx: mpsc::Receiver<CsTask>,
    mutex: MutexEngine,
    tick: Duration,
    slice: Duration,
}

impl CsRunner {
    pub fn new(mutex: MutexEngine, tick: Duration, slice: Duration) -> (TaskQueue, Self) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (
            TaskQueue { tx },
            Self {
                rx,
                mutex,
                tick,
                slice,
            },
        )
    }

    /// Drive the queue until cancelled.
    ///
    /// A task that fails has half-applied a replicated mutation; there
    /// is no recovery path for that, so the runner panics and takes the
    /// node down with it.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.tick) => {}
            }

            let first = match self.rx.try_recv() {
                Ok(task) => task,
                Err(_) => continue,
            };

            self.mutex.obtain().await;
            let deadline = tokio::time::Instant::now() + self.slice;

            Self::execute(first).await;
            while tokio::time::Instant::now() < deadline {
                match self.rx.try_recv() {
                    Ok(task) => Self::execute(task).await,
                    Err(_) => break,
                }
            }

            self.mutex.release().await;
        }
    }

    async fn execute(task: CsTask) {
        if let Err(e) = task.await {
            panic!("critical-section task failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::clock::LamportClock;
    use crate::peers::PeerSet;

    fn runner(tick: Duration) -> (TaskQueue, CsRunner) {
        let (mutex, _shared) = MutexEngine::new(
            Arc::new(LamportClock::new()),
            Arc::new(PeerSet::new()),
            1,
            "127.0.0.1:7101".to_string(),
            Duration::from_millis(100),
            Duration::from_millis(50),
        );
        CsRunner::new(mutex, tick, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_tasks_run_in_submission_order() {
        let (queue, runner) = runner(Duration::from_millis(5));
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            queue
                .push(Box::pin(async move {
                    order.lock().unwrap().push(i);
                    Ok(())
                }))
                .unwrap();
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(runner.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_push_fails_when_queue_full() {
        let (queue, _runner) = runner(Duration::from_secs(60));

        for _ in 0..QUEUE_CAPACITY {
            queue.push(Box::pin(async { Ok(()) })).unwrap();
        }
        assert!(matches!(
            queue.push(Box::pin(async { Ok(()) })),
            Err(GridError::QueueFull)
        ));
    }
}
