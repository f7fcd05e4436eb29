//! Bounded background queue feeding a fixed set of workers.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use revtrust_alerts::WORKER_SERVICE;
use revtrust_core::{ExecutionContext, ProductKey};

use crate::error::PipelineError;
use crate::pipeline::{Pipeline, ProcessOutcome};

/// Sending half of the work queue. Cheap to clone.
///
/// A key already queued or being processed is not queued again.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<ProductKey>,
    in_flight: Arc<Mutex<HashSet<ProductKey>>>,
}

impl WorkQueue {
    /// Queues `key`. Returns `false` when it is already in flight.
    ///
    /// # Errors
    ///
    /// [`PipelineError::QueueFull`] when the buffer is at capacity and
    /// [`PipelineError::QueueClosed`] once the workers have stopped.
    pub fn enqueue(&self, key: ProductKey) -> Result<bool, PipelineError> {
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if !in_flight.insert(key.clone()) {
                return Ok(false);
            }
        }
        match self.tx.try_send(key) {
            Ok(()) => Ok(true),
            Err(err) => {
                let (key, failure) = match err {
                    mpsc::error::TrySendError::Full(key) => (key, PipelineError::QueueFull),
                    mpsc::error::TrySendError::Closed(key) => (key, PipelineError::QueueClosed),
                };
                self.release(&key);
                Err(failure)
            }
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, key: &ProductKey) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Waits for every worker to exit. Workers exit once all [`WorkQueue`]
    /// clones are dropped and the buffer is drained.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker task panicked");
            }
        }
    }
}

/// Starts `concurrency` workers draining a queue of `capacity` keys.
///
/// Workers run every job with [`ExecutionContext::background`].
#[must_use]
pub fn spawn_workers(
    pipeline: Arc<Pipeline>,
    concurrency: usize,
    capacity: usize,
) -> (WorkQueue, WorkerPool) {
    let (tx, rx) = mpsc::channel::<ProductKey>(capacity.max(1));
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let queue = WorkQueue {
        tx,
        in_flight: Arc::new(Mutex::new(HashSet::new())),
    };

    let handles = (0..concurrency.max(1))
        .map(|worker| {
            let rx = Arc::clone(&rx);
            let pipeline = Arc::clone(&pipeline);
            let in_flight = Arc::clone(&queue.in_flight);
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(key) = next else {
                        break;
                    };
                    run_job(worker, &pipeline, &key).await;
                    in_flight
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&key);
                }
                tracing::debug!(worker, "worker stopped");
            })
        })
        .collect();

    (queue, WorkerPool { handles })
}

async fn run_job(worker: usize, pipeline: &Pipeline, key: &ProductKey) {
    match pipeline.process(key, ExecutionContext::background()).await {
        Ok(ProcessOutcome::Completed(summary)) => tracing::info!(
            worker,
            product_id = %key.product_id,
            country = %key.country,
            grade = %summary.grade,
            "job finished"
        ),
        Ok(ProcessOutcome::AlreadyCompleted) => tracing::debug!(
            worker,
            product_id = %key.product_id,
            "job skipped, already completed"
        ),
        Ok(ProcessOutcome::Deferred { job_id }) => tracing::info!(
            worker,
            product_id = %key.product_id,
            job_id = %job_id,
            "job deferred"
        ),
        Err(PipelineError::NotReady { status, .. }) => tracing::debug!(
            worker,
            product_id = %key.product_id,
            status = %status,
            "job skipped, record busy"
        ),
        Err(err) => {
            tracing::warn!(
                worker,
                product_id = %key.product_id,
                country = %key.country,
                error = %err,
                "job failed"
            );
            if let Some(kind) = err.unreported_kind() {
                let _ = pipeline
                    .alerter()
                    .failure(WORKER_SERVICE, kind, &format!("{key}: {err}"))
                    .await;
            }
        }
    }
}
