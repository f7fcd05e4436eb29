//! Tries review sources in priority order until one delivers.

use std::sync::Arc;

use revtrust_alerts::{Alerter, ENRICHMENT_SERVICE};
use revtrust_core::{ExecutionContext, ProductKey, ReviewBatch, SourceVariant};
use revtrust_db::AnalysisStore;
use revtrust_scraper::{DeferredJob, PersistOutcome, ScraperError, SourceAdapter};

use crate::enrich::MetadataEnricher;
use crate::error::PipelineError;

/// Which source delivered and what it left in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
    pub source: SourceVariant,
    pub outcome: Acquisition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// Reviews are stored as `fetched`.
    Stored { review_count: usize },
    /// A background chain owns the record until it lands `pending_analysis`.
    Deferred { job_id: String },
}

pub struct AcquisitionOrchestrator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    store: Arc<dyn AnalysisStore>,
    alerter: Arc<Alerter>,
    enricher: Option<Arc<dyn MetadataEnricher>>,
}

impl AcquisitionOrchestrator {
    #[must_use]
    pub fn new(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        store: Arc<dyn AnalysisStore>,
        alerter: Arc<Alerter>,
    ) -> Self {
        Self {
            adapters,
            store,
            alerter,
            enricher: None,
        }
    }

    #[must_use]
    pub fn with_enricher(mut self, enricher: Arc<dyn MetadataEnricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    #[must_use]
    pub fn sources(&self) -> Vec<SourceVariant> {
        self.adapters.iter().map(|a| a.variant()).collect()
    }

    /// Fetches and stores reviews for `key` from the first source that works.
    ///
    /// Retries happen inside each adapter; here a failed source is reported
    /// to the alerter and the next one is tried. A stored batch records a
    /// recovery for that source and, when title or image is missing, starts
    /// metadata enrichment without waiting for it. A deferred job is reported
    /// once its background chain ends.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AllSourcesFailed`] after marking the record
    /// failed, or [`PipelineError::Store`] when the store rejects a write.
    pub async fn acquire(
        &self,
        key: &ProductKey,
        ctx: ExecutionContext,
    ) -> Result<Acquired, PipelineError> {
        let mut failures: Vec<String> = Vec::with_capacity(self.adapters.len());

        for adapter in &self.adapters {
            let source = adapter.variant();
            tracing::info!(
                product_id = %key.product_id,
                country = %key.country,
                source = %source,
                in_background = ctx.in_background,
                "fetching reviews"
            );

            match adapter.fetch_and_persist(key, Arc::clone(&self.store), ctx).await {
                Ok(PersistOutcome::Stored {
                    review_count,
                    metadata_complete,
                }) => {
                    self.alerter.recovery(source.as_str());
                    tracing::info!(
                        product_id = %key.product_id,
                        country = %key.country,
                        source = %source,
                        reviews = review_count,
                        "reviews stored"
                    );
                    if !metadata_complete {
                        self.spawn_enrichment(key);
                    }
                    return Ok(Acquired {
                        source,
                        outcome: Acquisition::Stored { review_count },
                    });
                }
                Ok(PersistOutcome::Deferred(job)) => {
                    let job_id = job.job_id().to_string();
                    tracing::info!(
                        product_id = %key.product_id,
                        country = %key.country,
                        source = %source,
                        job_id = %job_id,
                        "acquisition continues in background"
                    );
                    self.watch_deferred(key, source, job);
                    return Ok(Acquired {
                        source,
                        outcome: Acquisition::Deferred { job_id },
                    });
                }
                Err(ScraperError::Store(err)) => return Err(err.into()),
                Err(err) => {
                    tracing::warn!(
                        product_id = %key.product_id,
                        country = %key.country,
                        source = %source,
                        kind = err.kind(),
                        error = %err,
                        "review source failed"
                    );
                    let _ = self
                        .alerter
                        .failure(source.as_str(), err.kind(), &format!("{key}: {err}"))
                        .await;
                    failures.push(format!("{source}: {err}"));
                }
            }
        }

        let reason = if failures.is_empty() {
            "no review sources configured".to_string()
        } else {
            format!("all review sources failed ({})", failures.join("; "))
        };
        tracing::error!(
            product_id = %key.product_id,
            country = %key.country,
            sources = failures.len(),
            "acquisition exhausted every source"
        );
        self.store.mark_failed(key, &reason).await?;
        Err(PipelineError::AllSourcesFailed {
            key: key.to_string(),
            reason,
        })
    }

    /// Fetches without touching the store or the alerter.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AllSourcesFailed`] when no source delivers.
    pub async fn fetch_preview(
        &self,
        key: &ProductKey,
    ) -> Result<(SourceVariant, ReviewBatch), PipelineError> {
        let mut failures = Vec::new();
        for adapter in &self.adapters {
            match adapter.fetch_reviews(key).await {
                Ok(batch) => return Ok((adapter.variant(), batch)),
                Err(err) => {
                    tracing::warn!(source = %adapter.variant(), error = %err, "preview fetch failed");
                    failures.push(format!("{}: {err}", adapter.variant()));
                }
            }
        }
        Err(PipelineError::AllSourcesFailed {
            key: key.to_string(),
            reason: format!("all review sources failed ({})", failures.join("; ")),
        })
    }

    #[must_use]
    pub fn alerter(&self) -> &Arc<Alerter> {
        &self.alerter
    }

    fn spawn_enrichment(&self, key: &ProductKey) {
        let Some(enricher) = &self.enricher else {
            return;
        };
        let enricher = Arc::clone(enricher);
        let store = Arc::clone(&self.store);
        let alerter = Arc::clone(&self.alerter);
        let key = key.clone();
        tracing::debug!(product_id = %key.product_id, "scheduling metadata enrichment");
        tokio::spawn(async move {
            enrich_and_report(enricher.as_ref(), store.as_ref(), &alerter, &key).await;
        });
    }

    /// Reports the deferred chain once it ends: a failure to the alerter
    /// under `source`, a success as that source's recovery followed by
    /// enrichment when the stored metadata is incomplete.
    fn watch_deferred(&self, key: &ProductKey, source: SourceVariant, job: DeferredJob) {
        let store = Arc::clone(&self.store);
        let alerter = Arc::clone(&self.alerter);
        let enricher = self.enricher.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let job_id = job.job_id().to_string();
            if let Err(err) = job.finish().await {
                tracing::warn!(
                    product_id = %key.product_id,
                    country = %key.country,
                    source = %source,
                    job_id = %job_id,
                    kind = err.kind(),
                    error = %err,
                    "deferred acquisition failed"
                );
                let _ = alerter
                    .failure(source.as_str(), err.kind(), &format!("{key}: {err}"))
                    .await;
                return;
            }

            alerter.recovery(source.as_str());
            tracing::info!(
                product_id = %key.product_id,
                country = %key.country,
                source = %source,
                job_id = %job_id,
                "deferred acquisition landed"
            );
            let Some(enricher) = enricher else {
                return;
            };
            match store.get(&key).await {
                Ok(Some(record)) if !record.metadata.is_complete() => {
                    enrich_and_report(enricher.as_ref(), store.as_ref(), &alerter, &key).await;
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(
                    product_id = %key.product_id,
                    error = %err,
                    "could not read record after deferred acquisition"
                ),
            }
        });
    }
}

async fn enrich_and_report(
    enricher: &dyn MetadataEnricher,
    store: &dyn AnalysisStore,
    alerter: &Alerter,
    key: &ProductKey,
) {
    match enricher.enrich(key, store).await {
        Ok(()) => alerter.recovery(ENRICHMENT_SERVICE),
        Err(err) => {
            tracing::warn!(
                product_id = %key.product_id,
                country = %key.country,
                kind = err.kind(),
                error = %err,
                "metadata enrichment failed"
            );
            let _ = alerter
                .failure(ENRICHMENT_SERVICE, err.kind(), &format!("{key}: {err}"))
                .await;
        }
    }
}
