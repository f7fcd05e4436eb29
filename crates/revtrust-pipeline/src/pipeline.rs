use std::sync::Arc;
use std::time::Duration;

use revtrust_alerts::Alerter;
use revtrust_core::{AnalysisStatus, AnalysisSummary, ExecutionContext, ProductKey};
use revtrust_db::AnalysisStore;

use crate::error::PipelineError;
use crate::orchestrator::{Acquisition, AcquisitionOrchestrator};
use crate::runner::AnalysisRunner;

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed(AnalysisSummary),
    /// A managed job is still running; the record becomes
    /// `pending_analysis` when it lands.
    Deferred { job_id: String },
    AlreadyCompleted,
}

pub struct Pipeline {
    store: Arc<dyn AnalysisStore>,
    orchestrator: AcquisitionOrchestrator,
    runner: AnalysisRunner,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        orchestrator: AcquisitionOrchestrator,
        runner: AnalysisRunner,
    ) -> Self {
        Self {
            store,
            orchestrator,
            runner,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn AnalysisStore> {
        &self.store
    }

    #[must_use]
    pub fn orchestrator(&self) -> &AcquisitionOrchestrator {
        &self.orchestrator
    }

    #[must_use]
    pub fn alerter(&self) -> &Arc<Alerter> {
        self.orchestrator.alerter()
    }

    /// Advances `key` as far as its current status allows.
    ///
    /// `pending` records are acquired and then analyzed; `failed` records are
    /// reset to `pending` first. `fetched` and `pending_analysis` records are
    /// analyzed. `completed` records are left alone.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotReady`] for records another worker is already
    /// analyzing, plus any acquisition or analysis failure.
    pub async fn process(
        &self,
        key: &ProductKey,
        ctx: ExecutionContext,
    ) -> Result<ProcessOutcome, PipelineError> {
        let record = self.store.get_or_create(key).await?;
        match record.status {
            AnalysisStatus::Completed => Ok(ProcessOutcome::AlreadyCompleted),
            AnalysisStatus::Fetched | AnalysisStatus::PendingAnalysis => {
                Ok(ProcessOutcome::Completed(self.runner.run(key).await?))
            }
            AnalysisStatus::Processing | AnalysisStatus::Analyzed => Err(PipelineError::NotReady {
                key: key.to_string(),
                status: record.status,
            }),
            AnalysisStatus::Pending | AnalysisStatus::Failed => {
                if record.status == AnalysisStatus::Failed {
                    tracing::info!(
                        product_id = %key.product_id,
                        country = %key.country,
                        attempts = record.attempts,
                        "retrying failed analysis"
                    );
                    self.store.transition(key, AnalysisStatus::Pending).await?;
                }
                let acquired = self.orchestrator.acquire(key, ctx).await?;
                match acquired.outcome {
                    Acquisition::Stored { .. } => {
                        Ok(ProcessOutcome::Completed(self.runner.run(key).await?))
                    }
                    Acquisition::Deferred { job_id } => Ok(ProcessOutcome::Deferred { job_id }),
                }
            }
        }
    }

    /// Scores an already fetched record.
    ///
    /// # Errors
    ///
    /// See [`AnalysisRunner::run`].
    pub async fn analyze(&self, key: &ProductKey) -> Result<AnalysisSummary, PipelineError> {
        self.runner.run(key).await
    }

    /// Polls the store until a deferred acquisition leaves `pending`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::DeferredTimeout`] if the record is still `pending`
    /// after `max_polls` checks.
    pub async fn await_deferred(
        &self,
        key: &ProductKey,
        interval: Duration,
        max_polls: u32,
    ) -> Result<AnalysisStatus, PipelineError> {
        let mut status = AnalysisStatus::Pending;
        for _ in 0..max_polls {
            tokio::time::sleep(interval).await;
            status = self
                .store
                .get(key)
                .await?
                .ok_or_else(|| PipelineError::NotFound(key.to_string()))?
                .status;
            if status != AnalysisStatus::Pending {
                return Ok(status);
            }
        }
        Err(PipelineError::DeferredTimeout {
            key: key.to_string(),
            status,
        })
    }
}
