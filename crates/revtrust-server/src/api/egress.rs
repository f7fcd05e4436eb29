use axum::{extract::State, Extension, Json};
use serde::Serialize;

use revtrust_scraper::{CredentialHealth, RouteHealth};

use crate::middleware::RequestId;

use super::{ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Serialize)]
pub(super) struct EgressSnapshot {
    healthy_credentials: usize,
    credentials: Vec<CredentialHealth>,
    routes: Vec<RouteHealth>,
}

pub(super) async fn egress_health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Json<ApiResponse<EgressSnapshot>> {
    let credentials = state.credentials.snapshot();
    let healthy_credentials = credentials.iter().filter(|c| c.healthy).count();

    Json(ApiResponse {
        data: EgressSnapshot {
            healthy_credentials,
            credentials,
            routes: state.routes.snapshot(),
        },
        meta: ResponseMeta::new(req_id.0),
    })
}
