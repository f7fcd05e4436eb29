use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use revtrust_core::{
    normalize_country, normalize_product_id, AnalysisSummary, ProductKey, PublicStatus,
    SourceVariant,
};
use revtrust_db::ProductAnalysis;
use revtrust_pipeline::{submit_for_analysis, SubmitReceipt};

use crate::middleware::RequestId;

use super::{map_db_error, map_pipeline_error, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct SubmitRequest {
    product_id: String,
    country: String,
}

/// Final state as shown to callers. Internal statuses collapse to
/// `processing`.
#[derive(Debug, Serialize)]
pub(super) struct AnalysisView {
    public_id: Uuid,
    product_id: String,
    country: String,
    status: PublicStatus,
    attempts: u32,
    review_count: usize,
    total_review_count: Option<u32>,
    product_title: Option<String>,
    product_image_url: Option<String>,
    source: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<AnalysisSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
    analyzed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<ProductAnalysis> for AnalysisView {
    fn from(record: ProductAnalysis) -> Self {
        Self {
            public_id: record.public_id,
            product_id: record.key.product_id,
            country: record.key.country,
            status: record.status.public(),
            attempts: record.attempts,
            review_count: record.reviews.len(),
            total_review_count: record.total_review_count,
            product_title: record.metadata.title,
            product_image_url: record.metadata.image_url,
            source: record.source_adapter.map(SourceVariant::as_str),
            summary: record.summary,
            failure_reason: record.failure_reason,
            analyzed_at: record.analyzed_at,
            updated_at: record.updated_at,
        }
    }
}

pub(super) async fn submit_analysis(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SubmitReceipt>>), ApiError> {
    let receipt = submit_for_analysis(
        state.store.as_ref(),
        &state.queue,
        &body.product_id,
        &body.country,
    )
    .await
    .map_err(|e| map_pipeline_error(req_id.0.clone(), &e))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse {
            data: receipt,
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

pub(super) async fn get_analysis(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path((country, product_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<AnalysisView>>, ApiError> {
    let key = match (normalize_product_id(&product_id), normalize_country(&country)) {
        (Ok(product_id), Ok(country)) => ProductKey::new(product_id, country),
        (Err(e), _) | (_, Err(e)) => {
            return Err(ApiError::new(req_id.0, "validation_error", e.to_string()));
        }
    };

    let record = state
        .store
        .get(&key)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| {
            ApiError::new(
                req_id.0.clone(),
                "not_found",
                format!("no analysis for {key}"),
            )
        })?;

    Ok(Json(ApiResponse {
        data: AnalysisView::from(record),
        meta: ResponseMeta::new(req_id.0),
    }))
}
