//! Background sweeps.
//!
//! Picks up records the managed-job chain left in `pending_analysis` and
//! fails records whose worker died mid-analysis.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use revtrust_db::AnalysisStore;
use revtrust_pipeline::{enqueue_pending_analysis, fail_stalled, WorkQueue};

const PENDING_SWEEP_LIMIT: usize = 100;
const STALL_SWEEP_LIMIT: usize = 500;
const STALL_AFTER_MINUTES: i64 = 30;

/// Builds and starts the scheduler.
///
/// The returned handle must be kept alive for the lifetime of the process;
/// dropping it stops all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// a job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(
    store: Arc<dyn AnalysisStore>,
    queue: WorkQueue,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    register_pending_sweep(&scheduler, Arc::clone(&store), queue).await?;
    register_stall_sweep(&scheduler, store).await?;

    scheduler.start().await?;
    Ok(scheduler)
}

/// Every minute (`0 * * * * *`): queue records waiting in `pending_analysis`.
async fn register_pending_sweep(
    scheduler: &JobScheduler,
    store: Arc<dyn AnalysisStore>,
    queue: WorkQueue,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async("0 * * * * *", move |_uuid, _lock| {
        let store = Arc::clone(&store);
        let queue = queue.clone();

        Box::pin(async move {
            if let Err(e) =
                enqueue_pending_analysis(store.as_ref(), &queue, PENDING_SWEEP_LIMIT).await
            {
                tracing::error!(error = %e, "scheduler: pending-analysis sweep failed");
            }
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}

/// Every 15 minutes (`0 */15 * * * *`): fail records stuck in `processing`.
async fn register_stall_sweep(
    scheduler: &JobScheduler,
    store: Arc<dyn AnalysisStore>,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async("0 */15 * * * *", move |_uuid, _lock| {
        let store = Arc::clone(&store);

        Box::pin(async move {
            match fail_stalled(
                store.as_ref(),
                chrono::Utc::now(),
                chrono::Duration::minutes(STALL_AFTER_MINUTES),
                STALL_SWEEP_LIMIT,
            )
            .await
            {
                Ok(0) => tracing::debug!("scheduler: no stalled analyses"),
                Ok(failed) => tracing::warn!(failed, "scheduler: stalled analyses failed"),
                Err(e) => tracing::error!(error = %e, "scheduler: stall sweep failed"),
            }
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}
