use serde::Serialize;
use uuid::Uuid;

use revtrust_core::{
    normalize_country, normalize_product_id, AnalysisStatus, ProductKey, PublicStatus,
};
use revtrust_db::AnalysisStore;

use crate::error::PipelineError;
use crate::worker::WorkQueue;

#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub public_id: Uuid,
    pub product_id: String,
    pub country: String,
    pub status: PublicStatus,
    pub enqueued: bool,
    pub attempts: u32,
}

/// Inbound trigger for one product.
///
/// Validates the country and product id, creates the record on first sight
/// and queues it for the workers. A `failed` record is reset to `pending`
/// (bumping its attempt counter) and queued again. `completed` and
/// in-progress records are returned as they are.
///
/// # Errors
///
/// [`PipelineError::Config`] for an unsupported country or malformed product
/// id, [`PipelineError::QueueFull`] when the workers are saturated.
pub async fn submit_for_analysis(
    store: &dyn AnalysisStore,
    queue: &WorkQueue,
    product_id: &str,
    country: &str,
) -> Result<SubmitReceipt, PipelineError> {
    let key = ProductKey::new(normalize_product_id(product_id)?, normalize_country(country)?);
    let mut record = store.get_or_create(&key).await?;

    if record.status == AnalysisStatus::Failed {
        store.transition(&key, AnalysisStatus::Pending).await?;
        record = store
            .get(&key)
            .await?
            .ok_or_else(|| PipelineError::NotFound(key.to_string()))?;
    }

    let enqueued = match record.status {
        AnalysisStatus::Pending | AnalysisStatus::Fetched | AnalysisStatus::PendingAnalysis => {
            queue.enqueue(key.clone())?
        }
        _ => false,
    };

    tracing::info!(
        product_id = %key.product_id,
        country = %key.country,
        status = %record.status,
        attempts = record.attempts,
        enqueued,
        "analysis submitted"
    );

    Ok(SubmitReceipt {
        public_id: record.public_id,
        product_id: key.product_id,
        country: key.country,
        status: record.status.public(),
        enqueued,
        attempts: record.attempts,
    })
}
