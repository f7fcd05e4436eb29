//! Managed-job variant: submit a scrape job to a remote job API, poll it,
//! and map the result rows into reviews.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use revtrust_core::{
    marketplace_host, AnalysisStatus, ExecutionContext, JobApiSettings, ProductKey,
    ProductMetadata, ReviewBatch, ReviewRecord, ScraperSettings, SourceVariant,
};
use revtrust_db::AnalysisStore;

use crate::error::ScraperError;

use super::{ensure_not_silently_empty, DeferredJob, PersistOutcome, SourceAdapter};

#[derive(Debug, Serialize)]
struct JobRequest<'a> {
    product_id: &'a str,
    country: &'a str,
    domain: &'a str,
    max_reviews: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub row_count: Option<u64>,
}

/// One result row as produced by the job API.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobRow {
    pub review_id: Option<String>,
    pub rating: Option<serde_json::Value>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
    pub verified: Option<bool>,
    pub vine: Option<bool>,
    pub date: Option<String>,
    pub helpful_count: Option<u32>,
    pub images: Vec<String>,
    pub videos: Vec<String>,
    pub product_title: Option<String>,
    pub product_description: Option<String>,
    pub product_image: Option<String>,
    pub total_reviews: Option<u32>,
}

/// Accepts `5`, `4.0` and `"4.0 out of 5 stars"`.
pub(crate) fn rating_from_value(value: &serde_json::Value) -> Option<u8> {
    let raw = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s
            .split_whitespace()
            .next()?
            .replace(',', ".")
            .parse::<f64>()
            .ok()?,
        _ => return None,
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rounded = raw.round() as u8;
    (1..=5).contains(&rounded).then_some(rounded)
}

fn rows_to_batch(rows: Vec<JobRow>) -> ReviewBatch {
    let mut metadata = ProductMetadata::default();
    let mut total_count = None;
    let reviews = rows
        .into_iter()
        .map(|row| {
            metadata.merge_missing(ProductMetadata {
                title: row.product_title,
                description: row.product_description,
                image_url: row.product_image,
            });
            if total_count.is_none() {
                total_count = row.total_reviews;
            }
            let mut record = ReviewRecord::new(
                row.rating.as_ref().and_then(rating_from_value),
                row.body.filter(|b| !b.trim().is_empty()),
            );
            if let Some(id) = row.review_id {
                record.id = id;
            }
            record.title = row.title;
            record.author = row.author;
            record.verified_purchase = row.verified.unwrap_or(false);
            record.incentivized = row.vine.unwrap_or(false);
            record.posted_date = row
                .date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d.get(..10).unwrap_or(d), "%Y-%m-%d").ok());
            record.helpful_count = row.helpful_count;
            record.images = row.images;
            record.videos = row.videos;
            record
        })
        .collect();
    ReviewBatch {
        reviews,
        metadata,
        total_count,
    }
}

#[derive(Clone)]
pub struct ManagedJobAdapter {
    client: reqwest::Client,
    settings: JobApiSettings,
    max_reviews: usize,
}

impl ManagedJobAdapter {
    /// # Errors
    ///
    /// Returns [`ScraperError::Http`] if the HTTP client cannot be built.
    pub fn new(settings: JobApiSettings, scraper: &ScraperSettings) -> Result<Self, ScraperError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(scraper.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            settings,
            max_reviews: scraper.max_reviews,
        })
    }

    fn base_url(&self) -> Result<&str, ScraperError> {
        self.settings
            .base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .ok_or(ScraperError::NotConfigured {
                variant: SourceVariant::ManagedJob,
                missing: "REVTRUST_JOB_API_URL",
            })
    }

    fn job_url(&self, job_id: &str) -> Result<String, ScraperError> {
        Ok(format!(
            "{}/jobs/{}",
            self.base_url()?,
            utf8_percent_encode(job_id, NON_ALPHANUMERIC)
        ))
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.settings.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn error_body(response: reqwest::Response) -> (u16, String) {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        (status, body)
    }

    /// Submits a job and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::JobSubmit`] on a non-2xx response.
    pub async fn submit(&self, key: &ProductKey) -> Result<String, ScraperError> {
        let url = format!("{}/jobs", self.base_url()?);
        let domain = marketplace_host(&key.country).unwrap_or("www.amazon.com");
        let request = JobRequest {
            product_id: &key.product_id,
            country: &key.country,
            domain,
            max_reviews: self.max_reviews,
        };
        let response = self
            .authorized(self.client.post(&url))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            let (status, message) = Self::error_body(response).await;
            return Err(ScraperError::JobSubmit { status, message });
        }
        let body = response.text().await?;
        let job: JobStatus =
            serde_json::from_str(&body).map_err(|source| ScraperError::Deserialize {
                context: "job submission response".to_string(),
                source,
            })?;
        tracing::info!(
            product_id = %key.product_id,
            country = %key.country,
            job_id = %job.id,
            "scrape job submitted"
        );
        Ok(job.id)
    }

    /// Polls until the job succeeds, fails, or the attempt cap is hit.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::JobFailed`] for a terminal failure status and
    /// [`ScraperError::PollExhausted`] when the cap is reached.
    pub async fn wait_for_job(&self, job_id: &str) -> Result<JobStatus, ScraperError> {
        let url = self.job_url(job_id)?;
        let interval = Duration::from_secs(self.settings.poll_interval_secs);
        let mut last_row_count = None;

        for attempt in 1..=self.settings.poll_max_attempts {
            let response = self.authorized(self.client.get(&url)).send().await?;
            if !response.status().is_success() {
                let (status, _) = Self::error_body(response).await;
                return Err(ScraperError::UnexpectedStatus { status, url });
            }
            let body = response.text().await?;
            let job: JobStatus =
                serde_json::from_str(&body).map_err(|source| ScraperError::Deserialize {
                    context: format!("job {job_id} status"),
                    source,
                })?;
            last_row_count = job.row_count.or(last_row_count);

            match job.status.to_ascii_lowercase().as_str() {
                "succeeded" | "completed" | "done" => return Ok(job),
                "failed" | "aborted" | "timed_out" | "timed-out" | "cancelled" => {
                    return Err(ScraperError::JobFailed {
                        job_id: job_id.to_string(),
                        status: job.status,
                    });
                }
                other => {
                    tracing::debug!(job_id, attempt, status = other, rows = ?job.row_count, "job still running");
                }
            }
            if attempt < self.settings.poll_max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        tracing::warn!(
            job_id,
            attempts = self.settings.poll_max_attempts,
            last_row_count = ?last_row_count,
            "job polling exhausted"
        );
        Err(ScraperError::PollExhausted {
            job_id: job_id.to_string(),
            attempts: self.settings.poll_max_attempts,
            last_row_count,
        })
    }

    /// Downloads result rows for a finished job.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::Deserialize`] if the payload is not a row array.
    pub async fn fetch_results(&self, job_id: &str) -> Result<ReviewBatch, ScraperError> {
        let url = format!("{}/results", self.job_url(job_id)?);
        let response = self.authorized(self.client.get(&url)).send().await?;
        if !response.status().is_success() {
            let (status, _) = Self::error_body(response).await;
            return Err(ScraperError::UnexpectedStatus { status, url });
        }
        let body = response.text().await?;
        let rows: Vec<JobRow> =
            serde_json::from_str(&body).map_err(|source| ScraperError::Deserialize {
                context: format!("job {job_id} results"),
                source,
            })?;
        let mut batch = rows_to_batch(rows);
        batch.reviews.truncate(self.max_reviews);
        Ok(batch)
    }

    async fn complete_job(&self, job_id: &str) -> Result<ReviewBatch, ScraperError> {
        self.wait_for_job(job_id).await?;
        let batch = self.fetch_results(job_id).await?;
        ensure_not_silently_empty(SourceVariant::ManagedJob, &batch)?;
        Ok(batch)
    }
}

#[async_trait]
impl SourceAdapter for ManagedJobAdapter {
    fn variant(&self) -> SourceVariant {
        SourceVariant::ManagedJob
    }

    async fn fetch_reviews(&self, key: &ProductKey) -> Result<ReviewBatch, ScraperError> {
        let job_id = self.submit(key).await?;
        self.complete_job(&job_id).await
    }

    /// In async mode, and only outside a background run, submits the job and
    /// hands polling to a spawned task that stores the result as
    /// `pending_analysis`, or marks the record failed. The returned
    /// [`DeferredJob`] resolves to that task's result. Otherwise behaves like
    /// the synchronous default.
    async fn fetch_and_persist(
        &self,
        key: &ProductKey,
        store: Arc<dyn AnalysisStore>,
        ctx: ExecutionContext,
    ) -> Result<PersistOutcome, ScraperError> {
        if !self.settings.async_mode || ctx.in_background {
            let batch = self.fetch_reviews(key).await?;
            store
                .save_fetched(key, &batch, self.variant(), AnalysisStatus::Fetched)
                .await?;
            return Ok(PersistOutcome::Stored {
                review_count: batch.reviews.len(),
                metadata_complete: batch.metadata.is_complete(),
            });
        }

        let job_id = self.submit(key).await?;
        let adapter = self.clone();
        let key = key.clone();
        let spawned_job = job_id.clone();
        let job = DeferredJob::spawn(job_id, async move {
            let outcome = match adapter.complete_job(&spawned_job).await {
                Ok(batch) => store
                    .save_fetched(
                        &key,
                        &batch,
                        SourceVariant::ManagedJob,
                        AnalysisStatus::PendingAnalysis,
                    )
                    .await
                    .map_err(ScraperError::from),
                Err(err) => Err(err),
            };
            if let Err(err) = &outcome {
                tracing::error!(
                    product_id = %key.product_id,
                    country = %key.country,
                    job_id = %spawned_job,
                    error = %err,
                    "background job chain failed"
                );
                if let Err(db_err) = store
                    .mark_failed(&key, &format!("managed job failed: {err}"))
                    .await
                {
                    tracing::error!(error = %db_err, "could not mark analysis failed");
                }
            }
            outcome
        });

        Ok(PersistOutcome::Deferred(job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_accepts_numbers_and_strings() {
        assert_eq!(rating_from_value(&serde_json::json!(5)), Some(5));
        assert_eq!(rating_from_value(&serde_json::json!(3.6)), Some(4));
        assert_eq!(rating_from_value(&serde_json::json!("4.0 out of 5 stars")), Some(4));
        assert_eq!(rating_from_value(&serde_json::json!("4,0 von 5 Sternen")), Some(4));
        assert_eq!(rating_from_value(&serde_json::json!(0)), None);
        assert_eq!(rating_from_value(&serde_json::json!(null)), None);
    }

    #[test]
    fn rows_map_to_batch_with_metadata() {
        let rows: Vec<JobRow> = serde_json::from_value(serde_json::json!([
            {
                "review_id": "R1", "rating": 5, "body": "Great", "verified": true,
                "vine": true, "date": "2024-01-05T00:00:00Z", "helpful_count": 3,
                "product_title": "Kettle", "total_reviews": 40
            },
            { "review_id": "R2", "rating": "2.0", "body": "  ",
              "product_image": "https://img.example/k.jpg" }
        ]))
        .unwrap();

        let batch = rows_to_batch(rows);
        assert_eq!(batch.reviews.len(), 2);
        assert_eq!(batch.total_count, Some(40));
        assert!(batch.metadata.is_complete());
        let first = &batch.reviews[0];
        assert!(first.verified_purchase && first.incentivized);
        assert_eq!(first.posted_date, NaiveDate::from_ymd_opt(2024, 1, 5));
        assert!(!batch.reviews[1].is_scorable());
    }
}
