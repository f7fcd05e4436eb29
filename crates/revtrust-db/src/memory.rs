//! In-process [`AnalysisStore`] used by the CLI dry-run path and by tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use revtrust_core::{
    AnalysisStatus, AnalysisSummary, ProductKey, ProductMetadata, ReviewBatch, SourceVariant,
};

use crate::analyses::ProductAnalysis;
use crate::store::AnalysisStore;
use crate::DbError;

#[derive(Debug, Default)]
pub struct MemoryAnalysisStore {
    records: Mutex<HashMap<ProductKey, ProductAnalysis>>,
}

impl MemoryAnalysisStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record without any status check. Test seeding only.
    pub async fn insert(&self, record: ProductAnalysis) {
        self.records.lock().await.insert(record.key.clone(), record);
    }

    /// Applies `apply` to the record if `to` is reachable from its status.
    async fn guarded<F>(&self, key: &ProductKey, to: AnalysisStatus, apply: F) -> Result<(), DbError>
    where
        F: FnOnce(&mut ProductAnalysis) + Send,
    {
        let mut records = self.records.lock().await;
        let record = records.get_mut(key).ok_or(DbError::NotFound)?;
        if !record.status.can_transition_to(to) {
            tracing::warn!(
                product_id = %key.product_id,
                country = %key.country,
                from = %record.status,
                to = %to,
                "rejected backward status write"
            );
            return Err(DbError::StatusRegression {
                key: key.to_string(),
                from: record.status,
                to,
            });
        }
        apply(record);
        record.status = to;
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl AnalysisStore for MemoryAnalysisStore {
    async fn get(&self, key: &ProductKey) -> Result<Option<ProductAnalysis>, DbError> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn get_or_create(&self, key: &ProductKey) -> Result<ProductAnalysis, DbError> {
        let mut records = self.records.lock().await;
        let record = records
            .entry(key.clone())
            .or_insert_with(|| ProductAnalysis::new_pending(key.clone(), Utc::now()));
        Ok(record.clone())
    }

    async fn transition(&self, key: &ProductKey, to: AnalysisStatus) -> Result<(), DbError> {
        self.guarded(key, to, |record| {
            if record.status == AnalysisStatus::Failed && to == AnalysisStatus::Pending {
                record.attempts += 1;
            }
            if to != AnalysisStatus::Failed {
                record.failure_reason = None;
            }
        })
        .await
    }

    async fn claim_for_analysis(&self, key: &ProductKey) -> Result<(), DbError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(key).ok_or(DbError::NotFound)?;
        if !record.status.is_claimable() {
            return Err(DbError::StatusRegression {
                key: key.to_string(),
                from: record.status,
                to: AnalysisStatus::Processing,
            });
        }
        record.status = AnalysisStatus::Processing;
        record.failure_reason = None;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn save_fetched(
        &self,
        key: &ProductKey,
        batch: &ReviewBatch,
        source: SourceVariant,
        next: AnalysisStatus,
    ) -> Result<(), DbError> {
        self.guarded(key, next, |record| {
            record.reviews.clone_from(&batch.reviews);
            record.total_review_count = batch.total_count;
            let mut metadata = batch.metadata.clone();
            metadata.merge_missing(std::mem::take(&mut record.metadata));
            record.metadata = metadata;
            record.source_adapter = Some(source);
            record.failure_reason = None;
            record.fetched_at = Some(Utc::now());
        })
        .await
    }

    async fn save_summary(
        &self,
        key: &ProductKey,
        summary: &AnalysisSummary,
    ) -> Result<(), DbError> {
        self.guarded(key, AnalysisStatus::Completed, |record| {
            record.summary = Some(summary.clone());
            record.failure_reason = None;
            record.analyzed_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_failed(&self, key: &ProductKey, reason: &str) -> Result<(), DbError> {
        self.guarded(key, AnalysisStatus::Failed, |record| {
            record.failure_reason = Some(reason.to_string());
        })
        .await
    }

    async fn update_metadata(
        &self,
        key: &ProductKey,
        metadata: &ProductMetadata,
    ) -> Result<(), DbError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(key).ok_or(DbError::NotFound)?;
        record.metadata.merge_missing(metadata.clone());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: AnalysisStatus,
        limit: usize,
    ) -> Result<Vec<ProductAnalysis>, DbError> {
        let records = self.records.lock().await;
        let mut matching: Vec<ProductAnalysis> = records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.updated_at);
        matching.truncate(limit);
        Ok(matching)
    }

    async fn list_stale(
        &self,
        status: AnalysisStatus,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ProductAnalysis>, DbError> {
        let records = self.records.lock().await;
        let mut matching: Vec<ProductAnalysis> = records
            .values()
            .filter(|r| r.status == status && r.updated_at < older_than)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.updated_at);
        matching.truncate(limit);
        Ok(matching)
    }
}
