//! Database operations for `product_analyses`.
//!
//! Every status-changing write filters on `status = ANY($allowed)` so a
//! backward move, or any move out of `completed`, never reaches the row.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use revtrust_core::{
    AnalysisStatus, AnalysisSummary, Confidence, FakeExample, Grade, ProductKey,
    ProductMetadata, ReviewBatch, ReviewRecord, SourceVariant,
};

use crate::DbError;

const SELECT_COLUMNS: &str = "id, public_id, product_id, country, status, reviews, \
     total_review_count, product_title, product_description, product_image_url, \
     source_adapter, fake_percentage, grade, confidence, explanation, \
     marketplace_rating, adjusted_rating, fake_examples, key_patterns, \
     failure_reason, attempts, fetched_at, analyzed_at, created_at, updated_at";

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `product_analyses` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AnalysisRow {
    pub id: i64,
    pub public_id: Uuid,
    pub product_id: String,
    pub country: String,
    pub status: String,
    pub reviews: serde_json::Value,
    pub total_review_count: Option<i32>,
    pub product_title: Option<String>,
    pub product_description: Option<String>,
    pub product_image_url: Option<String>,
    pub source_adapter: Option<String>,
    pub fake_percentage: Option<Decimal>,
    pub grade: Option<String>,
    pub confidence: Option<String>,
    pub explanation: Option<String>,
    pub marketplace_rating: Option<Decimal>,
    pub adjusted_rating: Option<Decimal>,
    pub fake_examples: serde_json::Value,
    pub key_patterns: serde_json::Value,
    pub failure_reason: Option<String>,
    /// The schema defines this as `INTEGER NOT NULL DEFAULT 0`.
    pub attempts: i32,
    pub fetched_at: Option<DateTime<Utc>>,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Decoded `ProductAnalysisState`, shared by every store implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductAnalysis {
    pub public_id: Uuid,
    pub key: ProductKey,
    pub status: AnalysisStatus,
    pub reviews: Vec<ReviewRecord>,
    pub total_review_count: Option<u32>,
    pub metadata: ProductMetadata,
    pub source_adapter: Option<SourceVariant>,
    /// Present once the record has been graded.
    pub summary: Option<AnalysisSummary>,
    pub failure_reason: Option<String>,
    pub attempts: u32,
    pub fetched_at: Option<DateTime<Utc>>,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductAnalysis {
    /// Fresh `pending` record, as inserted on first acquisition attempt.
    #[must_use]
    pub fn new_pending(key: ProductKey, now: DateTime<Utc>) -> Self {
        Self {
            public_id: Uuid::new_v4(),
            key,
            status: AnalysisStatus::Pending,
            reviews: Vec::new(),
            total_review_count: None,
            metadata: ProductMetadata::default(),
            source_adapter: None,
            summary: None,
            failure_reason: None,
            attempts: 0,
            fetched_at: None,
            analyzed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reviews re-packed as a batch, for handing to the analysis stage.
    #[must_use]
    pub fn review_batch(&self) -> ReviewBatch {
        ReviewBatch {
            reviews: self.reviews.clone(),
            metadata: self.metadata.clone(),
            total_count: self.total_review_count,
        }
    }
}

impl TryFrom<AnalysisRow> for ProductAnalysis {
    type Error = DbError;

    fn try_from(row: AnalysisRow) -> Result<Self, Self::Error> {
        let key = ProductKey::new(row.product_id, row.country);
        let malformed = |reason: String| DbError::Malformed {
            key: key.to_string(),
            reason,
        };

        let status: AnalysisStatus = row.status.parse().map_err(malformed)?;
        let source_adapter = row
            .source_adapter
            .as_deref()
            .map(str::parse::<SourceVariant>)
            .transpose()
            .map_err(malformed)?;
        let reviews: Vec<ReviewRecord> = serde_json::from_value(row.reviews)?;

        let summary = match row.grade.as_deref() {
            None => None,
            Some(raw_grade) => {
                let grade: Grade = raw_grade.parse().map_err(malformed)?;
                let confidence = row
                    .confidence
                    .as_deref()
                    .map(str::parse::<Confidence>)
                    .transpose()
                    .map_err(malformed)?;
                let fake_examples: Vec<FakeExample> = serde_json::from_value(row.fake_examples)?;
                let key_patterns: Vec<serde_json::Value> =
                    serde_json::from_value(row.key_patterns)?;
                Some(AnalysisSummary {
                    fake_percentage: row.fake_percentage.and_then(|d| d.to_f64()),
                    grade,
                    confidence,
                    explanation: row.explanation.unwrap_or_default(),
                    marketplace_rating: row.marketplace_rating.and_then(|d| d.to_f64()),
                    adjusted_rating: row.adjusted_rating.and_then(|d| d.to_f64()),
                    fake_examples,
                    key_patterns,
                })
            }
        };

        Ok(Self {
            public_id: row.public_id,
            key,
            status,
            reviews,
            total_review_count: row.total_review_count.and_then(|n| u32::try_from(n).ok()),
            metadata: ProductMetadata {
                title: row.product_title,
                description: row.product_description,
                image_url: row.product_image_url,
            },
            source_adapter,
            summary,
            failure_reason: row.failure_reason,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            fetched_at: row.fetched_at,
            analyzed_at: row.analyzed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Rounds to the column scale. `None` for non-finite input.
fn to_decimal(value: Option<f64>, scale: u32) -> Option<Decimal> {
    value
        .and_then(Decimal::from_f64)
        .map(|d| d.round_dp(scale))
}

fn status_strings(statuses: &[AnalysisStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Fetches the record for `key`, if any.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure, or [`DbError::Malformed`] /
/// [`DbError::Json`] if the stored row cannot be decoded.
pub async fn get_analysis(
    pool: &PgPool,
    key: &ProductKey,
) -> Result<Option<ProductAnalysis>, DbError> {
    let row = sqlx::query_as::<_, AnalysisRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM product_analyses WHERE product_id = $1 AND country = $2"
    ))
    .bind(&key.product_id)
    .bind(&key.country)
    .fetch_optional(pool)
    .await?;

    row.map(ProductAnalysis::try_from).transpose()
}

/// Returns the existing record for `key`, inserting a `pending` one first if
/// none exists.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert or fetch fails.
pub async fn get_or_create_analysis(
    pool: &PgPool,
    key: &ProductKey,
) -> Result<ProductAnalysis, DbError> {
    sqlx::query(
        "INSERT INTO product_analyses (public_id, product_id, country) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (product_id, country) DO NOTHING",
    )
    .bind(Uuid::new_v4())
    .bind(&key.product_id)
    .bind(&key.country)
    .execute(pool)
    .await?;

    get_analysis(pool, key).await?.ok_or(DbError::NotFound)
}

/// Lists records currently in `status`, oldest update first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn list_analyses_by_status(
    pool: &PgPool,
    status: AnalysisStatus,
    limit: i64,
) -> Result<Vec<ProductAnalysis>, DbError> {
    let rows = sqlx::query_as::<_, AnalysisRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM product_analyses \
         WHERE status = $1 ORDER BY updated_at ASC LIMIT $2"
    ))
    .bind(status.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ProductAnalysis::try_from).collect()
}

/// Lists records in `status` whose last update is older than `older_than`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on query failure.
pub async fn list_stale_analyses(
    pool: &PgPool,
    status: AnalysisStatus,
    older_than: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<ProductAnalysis>, DbError> {
    let rows = sqlx::query_as::<_, AnalysisRow>(&format!(
        "SELECT {SELECT_COLUMNS} FROM product_analyses \
         WHERE status = $1 AND updated_at < $2 ORDER BY updated_at ASC LIMIT $3"
    ))
    .bind(status.as_str())
    .bind(older_than)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ProductAnalysis::try_from).collect()
}

// ---------------------------------------------------------------------------
// Guarded writes
// ---------------------------------------------------------------------------

/// Builds the error for a guarded write that touched no row.
async fn rejected_write(pool: &PgPool, key: &ProductKey, to: AnalysisStatus) -> DbError {
    match get_analysis(pool, key).await {
        Ok(Some(current)) => {
            tracing::warn!(
                product_id = %key.product_id,
                country = %key.country,
                from = %current.status,
                to = %to,
                "rejected backward status write"
            );
            DbError::StatusRegression {
                key: key.to_string(),
                from: current.status,
                to,
            }
        }
        Ok(None) => DbError::NotFound,
        Err(e) => e,
    }
}

/// Moves the record to `to`.
///
/// Moving `failed → pending` bumps `attempts` and clears `failure_reason`.
///
/// # Errors
///
/// Returns [`DbError::StatusRegression`] if the current status may not move
/// to `to`, [`DbError::NotFound`] if no record exists.
pub async fn transition_analysis(
    pool: &PgPool,
    key: &ProductKey,
    to: AnalysisStatus,
) -> Result<(), DbError> {
    let allowed = status_strings(&AnalysisStatus::allowed_sources(to));

    let result = sqlx::query(
        "UPDATE product_analyses \
         SET attempts = attempts + CASE WHEN status = 'failed' AND $1 = 'pending' THEN 1 ELSE 0 END, \
             failure_reason = CASE WHEN $1 = 'failed' THEN failure_reason ELSE NULL END, \
             status = $1, updated_at = NOW() \
         WHERE product_id = $2 AND country = $3 AND status = ANY($4)",
    )
    .bind(to.as_str())
    .bind(&key.product_id)
    .bind(&key.country)
    .bind(&allowed)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(rejected_write(pool, key, to).await);
    }
    Ok(())
}

/// Takes a `fetched` or `pending_analysis` record into `processing`.
///
/// The status check and the write are one statement, so of two concurrent
/// callers only one sees a row affected.
///
/// # Errors
///
/// Returns [`DbError::StatusRegression`] when the record is in any other
/// status, [`DbError::NotFound`] if no record exists.
pub async fn claim_for_analysis(pool: &PgPool, key: &ProductKey) -> Result<(), DbError> {
    let claimable = status_strings(&AnalysisStatus::CLAIMABLE);

    let result = sqlx::query(
        "UPDATE product_analyses \
         SET status = $1, failure_reason = NULL, updated_at = NOW() \
         WHERE product_id = $2 AND country = $3 AND status = ANY($4)",
    )
    .bind(AnalysisStatus::Processing.as_str())
    .bind(&key.product_id)
    .bind(&key.country)
    .bind(&claimable)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(rejected_write(pool, key, AnalysisStatus::Processing).await);
    }
    Ok(())
}

/// Stores an acquired batch and moves the record to `next`.
///
/// # Errors
///
/// Returns [`DbError::StatusRegression`] if `next` is not reachable, or
/// [`DbError::Json`] if the reviews cannot be serialized.
pub async fn save_fetched(
    pool: &PgPool,
    key: &ProductKey,
    batch: &ReviewBatch,
    source: SourceVariant,
    next: AnalysisStatus,
) -> Result<(), DbError> {
    let allowed = status_strings(&AnalysisStatus::allowed_sources(next));
    let reviews = serde_json::to_value(&batch.reviews)?;
    let total = batch.total_count.and_then(|n| i32::try_from(n).ok());

    let result = sqlx::query(
        "UPDATE product_analyses \
         SET status = $1, reviews = $2, total_review_count = $3, \
             product_title = COALESCE($4, product_title), \
             product_description = COALESCE($5, product_description), \
             product_image_url = COALESCE($6, product_image_url), \
             source_adapter = $7, failure_reason = NULL, \
             fetched_at = NOW(), updated_at = NOW() \
         WHERE product_id = $8 AND country = $9 AND status = ANY($10)",
    )
    .bind(next.as_str())
    .bind(reviews)
    .bind(total)
    .bind(batch.metadata.title.as_deref())
    .bind(batch.metadata.description.as_deref())
    .bind(batch.metadata.image_url.as_deref())
    .bind(source.as_str())
    .bind(&key.product_id)
    .bind(&key.country)
    .bind(&allowed)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(rejected_write(pool, key, next).await);
    }
    Ok(())
}

/// Writes the graded summary and moves the record to `completed`.
///
/// # Errors
///
/// Returns [`DbError::StatusRegression`] if the record is already completed
/// or failed.
pub async fn save_summary(
    pool: &PgPool,
    key: &ProductKey,
    summary: &AnalysisSummary,
) -> Result<(), DbError> {
    let to = AnalysisStatus::Completed;
    let allowed = status_strings(&AnalysisStatus::allowed_sources(to));
    let fake_examples = serde_json::to_value(&summary.fake_examples)?;
    let key_patterns = serde_json::to_value(&summary.key_patterns)?;

    let result = sqlx::query(
        "UPDATE product_analyses \
         SET status = 'completed', fake_percentage = $1, grade = $2, confidence = $3, \
             explanation = $4, marketplace_rating = $5, adjusted_rating = $6, \
             fake_examples = $7, key_patterns = $8, failure_reason = NULL, \
             analyzed_at = NOW(), updated_at = NOW() \
         WHERE product_id = $9 AND country = $10 AND status = ANY($11)",
    )
    .bind(to_decimal(summary.fake_percentage, 2))
    .bind(summary.grade.as_str())
    .bind(summary.confidence.map(Confidence::as_str))
    .bind(&summary.explanation)
    .bind(to_decimal(summary.marketplace_rating, 2))
    .bind(to_decimal(summary.adjusted_rating, 2))
    .bind(fake_examples)
    .bind(key_patterns)
    .bind(&key.product_id)
    .bind(&key.country)
    .bind(&allowed)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(rejected_write(pool, key, to).await);
    }
    Ok(())
}

/// Moves the record to `failed` with a human-readable reason.
///
/// # Errors
///
/// Returns [`DbError::StatusRegression`] if the record is already completed.
pub async fn mark_failed(pool: &PgPool, key: &ProductKey, reason: &str) -> Result<(), DbError> {
    let to = AnalysisStatus::Failed;
    let allowed = status_strings(&AnalysisStatus::allowed_sources(to));

    let result = sqlx::query(
        "UPDATE product_analyses \
         SET status = 'failed', failure_reason = $1, updated_at = NOW() \
         WHERE product_id = $2 AND country = $3 AND status = ANY($4)",
    )
    .bind(reason)
    .bind(&key.product_id)
    .bind(&key.country)
    .bind(&allowed)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(rejected_write(pool, key, to).await);
    }
    Ok(())
}

/// Fills missing metadata columns. Existing values are never overwritten, so
/// this is allowed in any status, including `completed`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no record exists.
pub async fn update_metadata(
    pool: &PgPool,
    key: &ProductKey,
    metadata: &ProductMetadata,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE product_analyses \
         SET product_title = COALESCE(product_title, $1), \
             product_description = COALESCE(product_description, $2), \
             product_image_url = COALESCE(product_image_url, $3), \
             updated_at = NOW() \
         WHERE product_id = $4 AND country = $5",
    )
    .bind(metadata.title.as_deref())
    .bind(metadata.description.as_deref())
    .bind(metadata.image_url.as_deref())
    .bind(&key.product_id)
    .bind(&key.country)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> AnalysisRow {
        AnalysisRow {
            id: 1,
            public_id: Uuid::new_v4(),
            product_id: "B000000001".to_string(),
            country: "us".to_string(),
            status: "completed".to_string(),
            reviews: serde_json::json!([{"id": "R1", "rating": 5, "body": "great"}]),
            total_review_count: Some(120),
            product_title: Some("Kettle".to_string()),
            product_description: None,
            product_image_url: None,
            source_adapter: Some("direct_html".to_string()),
            fake_percentage: Some(Decimal::new(1250, 2)),
            grade: Some("B".to_string()),
            confidence: Some("high".to_string()),
            explanation: Some("Analyzed 1 reviews".to_string()),
            marketplace_rating: Some(Decimal::new(500, 2)),
            adjusted_rating: Some(Decimal::new(450, 2)),
            fake_examples: serde_json::json!([{"text": "wow", "reason": "generic"}]),
            key_patterns: serde_json::json!(["burst of 5-star reviews"]),
            failure_reason: None,
            attempts: 1,
            fetched_at: None,
            analyzed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn row_decodes_into_domain_record() {
        let analysis = ProductAnalysis::try_from(sample_row()).unwrap();

        assert_eq!(analysis.status, AnalysisStatus::Completed);
        assert_eq!(analysis.source_adapter, Some(SourceVariant::DirectHtml));
        assert_eq!(analysis.reviews.len(), 1);
        assert_eq!(analysis.total_review_count, Some(120));
        let summary = analysis.summary.unwrap();
        assert_eq!(summary.grade, Grade::B);
        assert_eq!(summary.confidence, Some(Confidence::High));
        assert!((summary.fake_percentage.unwrap() - 12.5).abs() < f64::EPSILON);
        assert_eq!(summary.fake_examples.len(), 1);
    }

    #[test]
    fn row_without_grade_has_no_summary() {
        let mut row = sample_row();
        row.status = "fetched".to_string();
        row.grade = None;

        let analysis = ProductAnalysis::try_from(row).unwrap();
        assert!(analysis.summary.is_none());
    }

    #[test]
    fn unknown_status_is_malformed() {
        let mut row = sample_row();
        row.status = "archived".to_string();

        let err = ProductAnalysis::try_from(row).unwrap_err();
        assert!(matches!(err, DbError::Malformed { .. }));
    }

    #[test]
    fn to_decimal_rounds_to_scale() {
        assert_eq!(to_decimal(Some(4.256), 2), Some(Decimal::new(426, 2)));
        assert_eq!(to_decimal(Some(f64::NAN), 2), None);
        assert_eq!(to_decimal(None, 2), None);
    }
}
