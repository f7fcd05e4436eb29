use std::sync::Arc;

use revtrust_alerts::{Alerter, LLM_SERVICE};
use revtrust_analysis::ReviewAnalyzer;
use revtrust_core::{AnalysisSummary, ProductKey};
use revtrust_db::{AnalysisStore, DbError};

use crate::error::PipelineError;

/// Scores a fetched record and writes the grade.
pub struct AnalysisRunner {
    store: Arc<dyn AnalysisStore>,
    analyzer: ReviewAnalyzer,
    alerter: Arc<Alerter>,
}

impl AnalysisRunner {
    #[must_use]
    pub fn new(store: Arc<dyn AnalysisStore>, analyzer: ReviewAnalyzer, alerter: Arc<Alerter>) -> Self {
        Self {
            store,
            analyzer,
            alerter,
        }
    }

    /// Claims a `fetched` or `pending_analysis` record, moving it to
    /// `processing`, and scores it to `completed`. Only one caller wins the
    /// claim. An analysis failure marks the record `failed` with the reason
    /// and is reported to the alerter.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotReady`] for records in any other status,
    /// [`PipelineError::Analysis`] when scoring fails, and
    /// [`PipelineError::Store`] on rejected writes.
    pub async fn run(&self, key: &ProductKey) -> Result<AnalysisSummary, PipelineError> {
        match self.store.claim_for_analysis(key).await {
            Ok(()) => {}
            Err(DbError::StatusRegression { from, .. }) => {
                return Err(PipelineError::NotReady {
                    key: key.to_string(),
                    status: from,
                })
            }
            Err(DbError::NotFound) => return Err(PipelineError::NotFound(key.to_string())),
            Err(err) => return Err(err.into()),
        }
        let record = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| PipelineError::NotFound(key.to_string()))?;

        tracing::info!(
            product_id = %key.product_id,
            country = %key.country,
            reviews = record.reviews.len(),
            "analysis started"
        );

        match self.analyzer.analyze(&record.reviews).await {
            Ok(summary) => {
                self.store.save_summary(key, &summary).await?;
                self.alerter.recovery(LLM_SERVICE);
                tracing::info!(
                    product_id = %key.product_id,
                    country = %key.country,
                    grade = %summary.grade,
                    "analysis completed"
                );
                Ok(summary)
            }
            Err(err) => {
                tracing::error!(
                    product_id = %key.product_id,
                    country = %key.country,
                    kind = err.kind(),
                    error = %err,
                    "analysis failed"
                );
                let _ = self
                    .alerter
                    .failure(LLM_SERVICE, err.kind(), &format!("{key}: {err}"))
                    .await;
                self.store
                    .mark_failed(key, &format!("analysis failed: {err}"))
                    .await?;
                Err(err.into())
            }
        }
    }
}
