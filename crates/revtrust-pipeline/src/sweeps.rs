//! Periodic maintenance run by the server's scheduler.

use chrono::{DateTime, Duration, Utc};

use revtrust_core::AnalysisStatus;
use revtrust_db::AnalysisStore;

use crate::error::PipelineError;
use crate::worker::WorkQueue;

pub const STALL_REASON: &str = "analysis stalled";

/// Queues up to `limit` records waiting in `pending_analysis`.
/// Returns how many were newly queued.
///
/// # Errors
///
/// [`PipelineError::Store`] if the listing fails. A full queue stops the
/// sweep early without error; the rest are picked up next time.
pub async fn enqueue_pending_analysis(
    store: &dyn AnalysisStore,
    queue: &WorkQueue,
    limit: usize,
) -> Result<usize, PipelineError> {
    let waiting = store
        .list_by_status(AnalysisStatus::PendingAnalysis, limit)
        .await?;
    let mut queued = 0usize;
    for record in waiting {
        match queue.enqueue(record.key) {
            Ok(true) => queued += 1,
            Ok(false) => {}
            Err(PipelineError::QueueFull) => {
                tracing::warn!(queued, "work queue full, pending sweep stopped early");
                break;
            }
            Err(err) => return Err(err),
        }
    }
    if queued > 0 {
        tracing::info!(queued, "pending analyses queued");
    }
    Ok(queued)
}

/// Fails records stuck in `processing` since before `now - stall_after`.
///
/// # Errors
///
/// [`PipelineError::Store`] if the listing fails. Individual write failures
/// are logged and skipped.
pub async fn fail_stalled(
    store: &dyn AnalysisStore,
    now: DateTime<Utc>,
    stall_after: Duration,
    limit: usize,
) -> Result<usize, PipelineError> {
    let stalled = store
        .list_stale(AnalysisStatus::Processing, now - stall_after, limit)
        .await?;
    let mut failed = 0usize;
    for record in stalled {
        match store.mark_failed(&record.key, STALL_REASON).await {
            Ok(()) => {
                failed += 1;
                tracing::warn!(
                    product_id = %record.key.product_id,
                    country = %record.key.country,
                    since = %record.updated_at,
                    "stalled analysis marked failed"
                );
            }
            Err(err) => tracing::warn!(
                product_id = %record.key.product_id,
                error = %err,
                "could not fail stalled analysis"
            ),
        }
    }
    Ok(failed)
}
