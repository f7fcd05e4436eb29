//! `AnalysisStore`: the persistence seam the pipeline depends on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use revtrust_core::{
    AnalysisStatus, AnalysisSummary, ProductKey, ProductMetadata, ReviewBatch, SourceVariant,
};

use crate::analyses::{self, ProductAnalysis};
use crate::DbError;

/// Read/write access to `ProductAnalysisState`.
///
/// Implementations must reject any status write that
/// [`AnalysisStatus::can_transition_to`] forbids, leaving the record as it was.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn get(&self, key: &ProductKey) -> Result<Option<ProductAnalysis>, DbError>;

    async fn get_or_create(&self, key: &ProductKey) -> Result<ProductAnalysis, DbError>;

    async fn transition(&self, key: &ProductKey, to: AnalysisStatus) -> Result<(), DbError>;

    /// Atomically moves a `fetched` or `pending_analysis` record to
    /// `processing`. Fails with [`DbError::StatusRegression`] from any other
    /// status, including `processing`.
    async fn claim_for_analysis(&self, key: &ProductKey) -> Result<(), DbError>;

    async fn save_fetched(
        &self,
        key: &ProductKey,
        batch: &ReviewBatch,
        source: SourceVariant,
        next: AnalysisStatus,
    ) -> Result<(), DbError>;

    async fn save_summary(&self, key: &ProductKey, summary: &AnalysisSummary)
        -> Result<(), DbError>;

    async fn mark_failed(&self, key: &ProductKey, reason: &str) -> Result<(), DbError>;

    async fn update_metadata(
        &self,
        key: &ProductKey,
        metadata: &ProductMetadata,
    ) -> Result<(), DbError>;

    async fn list_by_status(
        &self,
        status: AnalysisStatus,
        limit: usize,
    ) -> Result<Vec<ProductAnalysis>, DbError>;

    async fn list_stale(
        &self,
        status: AnalysisStatus,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ProductAnalysis>, DbError>;
}

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgAnalysisStore {
    pool: PgPool,
}

impl PgAnalysisStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl AnalysisStore for PgAnalysisStore {
    async fn get(&self, key: &ProductKey) -> Result<Option<ProductAnalysis>, DbError> {
        analyses::get_analysis(&self.pool, key).await
    }

    async fn get_or_create(&self, key: &ProductKey) -> Result<ProductAnalysis, DbError> {
        analyses::get_or_create_analysis(&self.pool, key).await
    }

    async fn transition(&self, key: &ProductKey, to: AnalysisStatus) -> Result<(), DbError> {
        analyses::transition_analysis(&self.pool, key, to).await
    }

    async fn claim_for_analysis(&self, key: &ProductKey) -> Result<(), DbError> {
        analyses::claim_for_analysis(&self.pool, key).await
    }

    async fn save_fetched(
        &self,
        key: &ProductKey,
        batch: &ReviewBatch,
        source: SourceVariant,
        next: AnalysisStatus,
    ) -> Result<(), DbError> {
        analyses::save_fetched(&self.pool, key, batch, source, next).await
    }

    async fn save_summary(
        &self,
        key: &ProductKey,
        summary: &AnalysisSummary,
    ) -> Result<(), DbError> {
        analyses::save_summary(&self.pool, key, summary).await
    }

    async fn mark_failed(&self, key: &ProductKey, reason: &str) -> Result<(), DbError> {
        analyses::mark_failed(&self.pool, key, reason).await
    }

    async fn update_metadata(
        &self,
        key: &ProductKey,
        metadata: &ProductMetadata,
    ) -> Result<(), DbError> {
        analyses::update_metadata(&self.pool, key, metadata).await
    }

    async fn list_by_status(
        &self,
        status: AnalysisStatus,
        limit: usize,
    ) -> Result<Vec<ProductAnalysis>, DbError> {
        analyses::list_analyses_by_status(&self.pool, status, sql_limit(limit)).await
    }

    async fn list_stale(
        &self,
        status: AnalysisStatus,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ProductAnalysis>, DbError> {
        analyses::list_stale_analyses(&self.pool, status, older_than, sql_limit(limit)).await
    }
}
