//! The four interchangeable review acquisition strategies.

mod direct_html;
mod endpoint_replay;
mod managed_job;
mod third_party_api;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use revtrust_core::{
    AnalysisStatus, AppConfig, ExecutionContext, ProductKey, ReviewBatch, SourceVariant,
};
use revtrust_db::AnalysisStore;

use crate::error::ScraperError;
use crate::http::EgressSession;

pub use direct_html::DirectHtmlAdapter;
pub use endpoint_replay::EndpointReplayAdapter;
pub use managed_job::ManagedJobAdapter;
pub use third_party_api::ThirdPartyApiAdapter;

/// What `fetch_and_persist` left behind.
#[derive(Debug)]
pub enum PersistOutcome {
    /// Reviews are stored and the record is `fetched`.
    Stored {
        review_count: usize,
        metadata_complete: bool,
    },
    /// A background task will fill the record in later.
    Deferred(DeferredJob),
}

/// A spawned acquisition chain. It has already written `pending_analysis` or
/// `failed` to the store by the time [`finish`](Self::finish) returns.
#[derive(Debug)]
pub struct DeferredJob {
    job_id: String,
    handle: JoinHandle<Result<(), ScraperError>>,
}

impl DeferredJob {
    pub fn spawn<F>(job_id: impl Into<String>, chain: F) -> Self
    where
        F: Future<Output = Result<(), ScraperError>> + Send + 'static,
    {
        Self {
            job_id: job_id.into(),
            handle: tokio::spawn(chain),
        }
    }

    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Waits for the chain to end.
    ///
    /// # Errors
    ///
    /// The chain's own error, or [`ScraperError::BackgroundTask`] if the task
    /// panicked or was cancelled.
    pub async fn finish(self) -> Result<(), ScraperError> {
        self.handle
            .await
            .map_err(|e| ScraperError::BackgroundTask {
                job_id: self.job_id,
                reason: e.to_string(),
            })?
    }
}

/// Capability shared by every acquisition strategy.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn variant(&self) -> SourceVariant;

    /// Fetches reviews, product metadata and the reported total.
    async fn fetch_reviews(&self, key: &ProductKey) -> Result<ReviewBatch, ScraperError>;

    /// Fetches and writes the batch to `store`, moving the record to `fetched`.
    async fn fetch_and_persist(
        &self,
        key: &ProductKey,
        store: Arc<dyn AnalysisStore>,
        _ctx: ExecutionContext,
    ) -> Result<PersistOutcome, ScraperError> {
        let batch = self.fetch_reviews(key).await?;
        store
            .save_fetched(key, &batch, self.variant(), AnalysisStatus::Fetched)
            .await?;
        Ok(PersistOutcome::Stored {
            review_count: batch.reviews.len(),
            metadata_complete: batch.metadata.is_complete(),
        })
    }
}

/// Rejects an empty batch when the listing reports reviews exist.
pub(crate) fn ensure_not_silently_empty(
    variant: SourceVariant,
    batch: &ReviewBatch,
) -> Result<(), ScraperError> {
    match batch.total_count {
        Some(reported) if reported > 0 && batch.reviews.is_empty() => {
            Err(ScraperError::EmptyResult { variant, reported })
        }
        _ => Ok(()),
    }
}

/// Builds the adapter for one variant.
///
/// # Errors
///
/// Returns [`ScraperError::Http`] if an HTTP client cannot be constructed.
pub fn build_adapter(
    variant: SourceVariant,
    config: &AppConfig,
    session: &Arc<EgressSession>,
) -> Result<Arc<dyn SourceAdapter>, ScraperError> {
    let adapter: Arc<dyn SourceAdapter> = match variant {
        SourceVariant::ManagedJob => Arc::new(ManagedJobAdapter::new(
            config.job_api.clone(),
            &config.scraper,
        )?),
        SourceVariant::DirectHtml => Arc::new(DirectHtmlAdapter::new(Arc::clone(session))),
        SourceVariant::EndpointReplay => Arc::new(EndpointReplayAdapter::new(
            Arc::clone(session),
            DirectHtmlAdapter::new(Arc::clone(session)),
        )),
        SourceVariant::ThirdPartyApi => Arc::new(ThirdPartyApiAdapter::new(
            config.reviews_api.clone(),
            &config.scraper,
        )?),
    };
    Ok(adapter)
}

/// Adapters in the configured fallback order, primary first.
///
/// # Errors
///
/// Returns [`ScraperError::Http`] if an HTTP client cannot be constructed.
pub fn build_adapters(
    config: &AppConfig,
    session: &Arc<EgressSession>,
) -> Result<Vec<Arc<dyn SourceAdapter>>, ScraperError> {
    config
        .source_order
        .iter()
        .map(|variant| build_adapter(*variant, config, session))
        .collect()
}
