use super::*;
use axum::body::{to_bytes, Body};
use axum::http::Request;
use axum::response::Response;
use chrono::Utc;
use tower::ServiceExt;

use revtrust_alerts::{AlertPolicy, Alerter, ImpactCatalogue, LogNotifier};
use revtrust_analysis::{ChatCompletion, LlmError, ReviewAnalyzer};
use revtrust_core::{
    AnalysisSummary, ChunkSettings, EgressFile, Grade, ProductKey, SourceVariant,
};
use revtrust_db::{MemoryAnalysisStore, ProductAnalysis};
use revtrust_pipeline::{spawn_workers, AcquisitionOrchestrator, AnalysisRunner, Pipeline};

const TOKEN: &str = "test-token";

struct SilentLlm;

#[async_trait::async_trait]
impl ChatCompletion for SilentLlm {
    async fn complete(&self, _: &str, _: &str, _: u32) -> Result<String, LlmError> {
        Err(LlmError::EmptyResponse)
    }
}

fn state_with(store: Arc<MemoryAnalysisStore>) -> AppState {
    let dyn_store: Arc<dyn AnalysisStore> = store;
    let alerter = Arc::new(Alerter::new(
        AlertPolicy::new(ImpactCatalogue::new(SourceVariant::DirectHtml)),
        Arc::new(LogNotifier),
    ));
    let orchestrator =
        AcquisitionOrchestrator::new(Vec::new(), Arc::clone(&dyn_store), Arc::clone(&alerter));
    let chunking = ChunkSettings {
        chunk_size: 25,
        concurrency: 1,
        failure_ceiling: 0.5,
        inter_chunk_delay_ms: 0,
        chunk_timeout_secs: 5,
    };
    let analyzer = ReviewAnalyzer::new(Arc::new(SilentLlm), chunking, 500);
    let runner = AnalysisRunner::new(Arc::clone(&dyn_store), analyzer, alerter);
    let pipeline = Arc::new(Pipeline::new(Arc::clone(&dyn_store), orchestrator, runner));
    let (queue, _workers) = spawn_workers(pipeline, 1, 8);

    AppState {
        store: dyn_store,
        queue,
        credentials: Arc::new(CredentialPool::new(&[])),
        routes: Arc::new(RouteSelector::new(EgressFile::default().routes_or_direct())),
    }
}

fn app_with(store: Arc<MemoryAnalysisStore>, rate_limit: RateLimitState) -> Router {
    let auth = AuthState::from_keys(TOKEN, false).expect("auth");
    build_app(state_with(store), auth, rate_limit)
}

fn app() -> Router {
    app_with(Arc::new(MemoryAnalysisStore::new()), default_rate_limit_state())
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .expect("request")
}

fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn json_body(response: Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&body).expect("json parse")
}

#[test]
fn api_error_validation_error_maps_to_bad_request() {
    let response = ApiError::new("req-1", "validation_error", "invalid input").into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[test]
fn api_error_queue_full_maps_to_service_unavailable() {
    let response = ApiError::new("req-1", "queue_full", "busy").into_response();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn health_is_public_and_reports_store() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .header("x-request-id", "req-health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "req-health"
    );
    let json = json_body(response).await;
    assert_eq!(json["data"]["status"], "ok");
    assert_eq!(json["data"]["store"], "ok");
    assert_eq!(json["meta"]["request_id"], "req-health");
}

#[tokio::test]
async fn protected_routes_require_bearer_token() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/egress")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn submit_returns_accepted_with_public_status() {
    let response = app()
        .oneshot(post_json(
            "/api/v1/analyses",
            &serde_json::json!({"product_id": "b0testkey1", "country": "US"}),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = json_body(response).await;
    assert_eq!(json["data"]["product_id"], "B0TESTKEY1");
    assert_eq!(json["data"]["country"], "us");
    assert_eq!(json["data"]["status"], "processing");
    assert_eq!(json["data"]["enqueued"], true);
}

#[tokio::test]
async fn submit_rejects_unsupported_country() {
    let response = app()
        .oneshot(post_json(
            "/api/v1/analyses",
            &serde_json::json!({"product_id": "B0TESTKEY1", "country": "zz"}),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "validation_error");
}

#[tokio::test]
async fn unknown_analysis_is_not_found() {
    let response = app()
        .oneshot(get_req("/api/v1/analyses/us/B0NOTHERE1"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn completed_analysis_exposes_summary() {
    let store = Arc::new(MemoryAnalysisStore::new());
    let mut record = ProductAnalysis::new_pending(ProductKey::new("B0DONE0001", "gb"), Utc::now());
    record.status = AnalysisStatus::Completed;
    record.source_adapter = Some(SourceVariant::ThirdPartyApi);
    record.summary = Some(AnalysisSummary {
        fake_percentage: Some(12.0),
        grade: Grade::B,
        confidence: None,
        explanation: "Analyzed 30 reviews in 2 chunks.".to_string(),
        marketplace_rating: Some(4.4),
        adjusted_rating: Some(4.2),
        fake_examples: Vec::new(),
        key_patterns: Vec::new(),
    });
    store.insert(record).await;

    let response = app_with(store, default_rate_limit_state())
        .oneshot(get_req("/api/v1/analyses/uk/b0done0001"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["status"], "completed");
    assert_eq!(json["data"]["country"], "gb");
    assert_eq!(json["data"]["source"], "third_party_api");
    assert_eq!(json["data"]["summary"]["grade"], "B");
}

#[tokio::test]
async fn internal_statuses_collapse_to_processing() {
    let store = Arc::new(MemoryAnalysisStore::new());
    let mut record = ProductAnalysis::new_pending(ProductKey::new("B0WAIT0001", "us"), Utc::now());
    record.status = AnalysisStatus::PendingAnalysis;
    store.insert(record).await;

    let response = app_with(store, default_rate_limit_state())
        .oneshot(get_req("/api/v1/analyses/us/B0WAIT0001"))
        .await
        .expect("response");

    let json = json_body(response).await;
    assert_eq!(json["data"]["status"], "processing");
    assert!(json["data"].get("summary").is_none());
}

#[tokio::test]
async fn egress_snapshot_lists_routes() {
    let response = app()
        .oneshot(get_req("/api/v1/egress"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["data"]["healthy_credentials"], 0);
    assert_eq!(json["data"]["routes"][0]["name"], "direct");
}

#[tokio::test]
async fn rate_limit_rejects_requests_past_the_window_budget() {
    let app = app_with(
        Arc::new(MemoryAnalysisStore::new()),
        RateLimitState::new(1, Duration::from_secs(60)),
    );

    let anonymous = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/egress")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let first = app
        .clone()
        .oneshot(get_req("/api/v1/egress"))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(get_req("/api/v1/egress"))
        .await
        .expect("response");
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = second
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .expect("retry-after header");
    assert!((1..=60).contains(&retry_after));
}

#[tokio::test]
async fn malformed_request_ids_are_replaced() {
    let app = app_with(Arc::new(MemoryAnalysisStore::new()), default_rate_limit_state());
    let res = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .header("x-request-id", "bad id\twith spaces")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let echoed = res
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .expect("request id header");
    assert!(uuid::Uuid::parse_str(echoed).is_ok());
}
