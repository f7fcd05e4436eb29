//! End-to-end pipeline tests over the in-memory store with scripted sources
//! and a scripted model.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use revtrust_alerts::{
    Alert, AlertError, AlertPolicy, Alerter, ImpactCatalogue, Notifier, Severity,
};
use revtrust_analysis::{ChatCompletion, LlmError, ReviewAnalyzer};
use revtrust_core::{
    AnalysisStatus, ChunkSettings, ExecutionContext, Grade, ProductKey, ProductMetadata,
    ReviewBatch, ReviewRecord, SourceVariant,
};
use revtrust_db::{AnalysisStore, DbError, MemoryAnalysisStore, ProductAnalysis};
use revtrust_pipeline::{
    enqueue_pending_analysis, fail_stalled, spawn_workers, submit_for_analysis,
    AcquisitionOrchestrator, AnalysisRunner, MetadataEnricher, Pipeline, PipelineError,
    ProcessOutcome, STALL_REASON,
};
use revtrust_scraper::{DeferredJob, PersistOutcome, ScraperError, SourceAdapter};

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Deferral {
    Never,
    Lands,
    Fails,
}

struct FakeSource {
    variant: SourceVariant,
    failures_before_success: usize,
    failure: fn() -> ScraperError,
    deferral: Deferral,
    batch: ReviewBatch,
    calls: AtomicUsize,
}

fn hard_block() -> ScraperError {
    ScraperError::HardBlock {
        reason: "redirected to sign-in".to_string(),
    }
}

fn broken_store() -> ScraperError {
    ScraperError::Store(DbError::Malformed {
        key: "us/B0TESTKEY1".to_string(),
        reason: "reviews column is not an array".to_string(),
    })
}

impl FakeSource {
    fn delivering(variant: SourceVariant, batch: ReviewBatch) -> Arc<Self> {
        Self::flaky(variant, 0, batch)
    }

    fn blocked(variant: SourceVariant) -> Arc<Self> {
        Self::flaky(variant, usize::MAX, batch(5))
    }

    fn flaky(variant: SourceVariant, failures: usize, batch: ReviewBatch) -> Arc<Self> {
        Arc::new(Self {
            variant,
            failures_before_success: failures,
            failure: hard_block,
            deferral: Deferral::Never,
            batch,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing_with(variant: SourceVariant, failure: fn() -> ScraperError) -> Arc<Self> {
        Arc::new(Self {
            variant,
            failures_before_success: usize::MAX,
            failure,
            deferral: Deferral::Never,
            batch: batch(5),
            calls: AtomicUsize::new(0),
        })
    }

    fn deferring(variant: SourceVariant, batch: ReviewBatch) -> Arc<Self> {
        Self::deferred(variant, Deferral::Lands, batch)
    }

    fn deferred(variant: SourceVariant, deferral: Deferral, batch: ReviewBatch) -> Arc<Self> {
        Arc::new(Self {
            variant,
            failures_before_success: 0,
            failure: hard_block,
            deferral,
            batch,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SourceAdapter for FakeSource {
    fn variant(&self) -> SourceVariant {
        self.variant
    }

    async fn fetch_reviews(&self, _key: &ProductKey) -> Result<ReviewBatch, ScraperError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            return Err((self.failure)());
        }
        Ok(self.batch.clone())
    }

    async fn fetch_and_persist(
        &self,
        key: &ProductKey,
        store: Arc<dyn AnalysisStore>,
        ctx: ExecutionContext,
    ) -> Result<PersistOutcome, ScraperError> {
        let batch = self.fetch_reviews(key).await?;
        if self.deferral != Deferral::Never && !ctx.in_background {
            let key = key.clone();
            let variant = self.variant;
            let deferral = self.deferral;
            let job = DeferredJob::spawn("job1", async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                if deferral == Deferral::Fails {
                    store
                        .mark_failed(&key, "managed job failed: job job1 ended with status aborted")
                        .await?;
                    return Err(ScraperError::JobFailed {
                        job_id: "job1".to_string(),
                        status: "aborted".to_string(),
                    });
                }
                store
                    .save_fetched(&key, &batch, variant, AnalysisStatus::PendingAnalysis)
                    .await?;
                Ok(())
            });
            return Ok(PersistOutcome::Deferred(job));
        }
        store
            .save_fetched(key, &batch, self.variant, AnalysisStatus::Fetched)
            .await?;
        Ok(PersistOutcome::Stored {
            review_count: batch.reviews.len(),
            metadata_complete: batch.metadata.is_complete(),
        })
    }
}

struct ScriptedLlm {
    answer: String,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn answering(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ChatCompletion for ScriptedLlm {
    async fn complete(&self, _system: &str, _user: &str, _max_tokens: u32) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Alert>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<Alert> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        self.sent.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

struct TitleEnricher;

#[async_trait]
impl MetadataEnricher for TitleEnricher {
    async fn enrich(
        &self,
        key: &ProductKey,
        store: &dyn AnalysisStore,
    ) -> Result<(), ScraperError> {
        let metadata = ProductMetadata {
            title: Some("Enriched Kettle".to_string()),
            description: None,
            image_url: Some("https://img.example/kettle.jpg".to_string()),
        };
        store.update_metadata(key, &metadata).await?;
        Ok(())
    }
}

struct BlockedEnricher;

#[async_trait]
impl MetadataEnricher for BlockedEnricher {
    async fn enrich(
        &self,
        _key: &ProductKey,
        _store: &dyn AnalysisStore,
    ) -> Result<(), ScraperError> {
        Err(ScraperError::SoftBlock {
            url: "https://www.amazon.com/dp/B0TESTKEY1".to_string(),
            indicator: "captcha".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn batch(n: usize) -> ReviewBatch {
    let reviews = (0..n)
        .map(|i| {
            let mut r = ReviewRecord::new(Some(4), Some(format!("Solid kettle, review {i}.")));
            r.id = format!("R{i}");
            r
        })
        .collect();
    ReviewBatch {
        reviews,
        metadata: ProductMetadata {
            title: Some("Kettle".to_string()),
            description: None,
            image_url: Some("https://img.example/k.jpg".to_string()),
        },
        total_count: u32::try_from(n).ok(),
    }
}

fn verdict(pct: f64) -> String {
    json!({"fake_percentage": pct, "fake_examples": [], "key_patterns": [], "explanation": ""})
        .to_string()
}

fn key() -> ProductKey {
    ProductKey::new("B0TESTKEY1", "us")
}

struct Harness {
    pipeline: Arc<Pipeline>,
    store: Arc<MemoryAnalysisStore>,
    notifier: Arc<RecordingNotifier>,
    alerter: Arc<Alerter>,
}

fn harness(sources: Vec<Arc<FakeSource>>, llm: Arc<ScriptedLlm>) -> Harness {
    harness_with(sources, llm, None)
}

fn harness_with(
    sources: Vec<Arc<FakeSource>>,
    llm: Arc<ScriptedLlm>,
    enricher: Option<Arc<dyn MetadataEnricher>>,
) -> Harness {
    let store = Arc::new(MemoryAnalysisStore::new());
    let dyn_store: Arc<dyn AnalysisStore> = store.clone();
    let notifier = Arc::new(RecordingNotifier::default());
    let alerter = Arc::new(Alerter::new(
        AlertPolicy::new(ImpactCatalogue::new(SourceVariant::DirectHtml)),
        notifier.clone(),
    ));
    let adapters: Vec<Arc<dyn SourceAdapter>> = sources
        .into_iter()
        .map(|s| s as Arc<dyn SourceAdapter>)
        .collect();
    let mut orchestrator =
        AcquisitionOrchestrator::new(adapters, Arc::clone(&dyn_store), Arc::clone(&alerter));
    if let Some(enricher) = enricher {
        orchestrator = orchestrator.with_enricher(enricher);
    }
    let analyzer = ReviewAnalyzer::new(
        llm,
        ChunkSettings {
            chunk_size: 25,
            concurrency: 2,
            failure_ceiling: 0.5,
            inter_chunk_delay_ms: 0,
            chunk_timeout_secs: 5,
        },
        1000,
    );
    let runner = AnalysisRunner::new(Arc::clone(&dyn_store), analyzer, Arc::clone(&alerter));
    Harness {
        pipeline: Arc::new(Pipeline::new(dyn_store, orchestrator, runner)),
        store,
        notifier,
        alerter,
    }
}

async fn status_of(store: &MemoryAnalysisStore, key: &ProductKey) -> AnalysisStatus {
    store.get(key).await.unwrap().unwrap().status
}

async fn wait_for_status(store: &MemoryAnalysisStore, key: &ProductKey, want: AnalysisStatus) {
    for _ in 0..200 {
        if status_of(store, key).await == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{key} never reached {want}");
}

async fn wait_for_alert(notifier: &RecordingNotifier, service: &str) -> Alert {
    for _ in 0..200 {
        if let Some(alert) = notifier.sent().into_iter().find(|a| a.service == service) {
            return alert;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no alert for {service}");
}

// ---------------------------------------------------------------------------
// Acquisition and analysis
// ---------------------------------------------------------------------------

#[tokio::test]
async fn falls_back_to_next_source_and_completes() {
    let blocked = FakeSource::blocked(SourceVariant::DirectHtml);
    let api = FakeSource::delivering(SourceVariant::ThirdPartyApi, batch(10));
    let h = harness(vec![blocked.clone(), api.clone()], ScriptedLlm::answering(&verdict(10.0)));

    let outcome = h
        .pipeline
        .process(&key(), ExecutionContext::foreground())
        .await
        .unwrap();

    let ProcessOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.grade, Grade::B);

    let record = h.store.get(&key()).await.unwrap().unwrap();
    assert_eq!(record.status, AnalysisStatus::Completed);
    assert_eq!(record.source_adapter, Some(SourceVariant::ThirdPartyApi));
    assert_eq!(record.reviews.len(), 10);

    let alerts = h.notifier.sent();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].service, "direct_html");
    assert_eq!(alerts[0].error_type, "hard_block");
    assert_eq!(alerts[0].severity, Severity::P3);
}

#[tokio::test]
async fn all_sources_failing_marks_record_failed() {
    let h = harness(
        vec![
            FakeSource::blocked(SourceVariant::DirectHtml),
            FakeSource::blocked(SourceVariant::ThirdPartyApi),
        ],
        ScriptedLlm::answering(&verdict(0.0)),
    );

    let err = h
        .pipeline
        .process(&key(), ExecutionContext::foreground())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::AllSourcesFailed { .. }), "got: {err:?}");

    let record = h.store.get(&key()).await.unwrap().unwrap();
    assert_eq!(record.status, AnalysisStatus::Failed);
    assert!(record
        .failure_reason
        .unwrap()
        .starts_with("all review sources failed"));
    assert_eq!(record.status.public(), revtrust_core::PublicStatus::Failed);

    let services: Vec<String> = h.notifier.sent().into_iter().map(|a| a.service).collect();
    assert_eq!(services, vec!["direct_html", "third_party_api"]);
}

#[tokio::test]
async fn failed_record_is_retried_and_counts_attempts() {
    let flaky = FakeSource::flaky(SourceVariant::DirectHtml, 1, batch(6));
    let h = harness(vec![flaky], ScriptedLlm::answering(&verdict(0.0)));

    assert!(h
        .pipeline
        .process(&key(), ExecutionContext::foreground())
        .await
        .is_err());
    assert_eq!(status_of(&h.store, &key()).await, AnalysisStatus::Failed);

    let outcome = h
        .pipeline
        .process(&key(), ExecutionContext::foreground())
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessOutcome::Completed(_)));

    let record = h.store.get(&key()).await.unwrap().unwrap();
    assert_eq!(record.status, AnalysisStatus::Completed);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.failure_reason, None);
}

#[tokio::test]
async fn unusable_model_output_fails_analysis_and_alerts() {
    let h = harness(
        vec![FakeSource::delivering(SourceVariant::DirectHtml, batch(8))],
        ScriptedLlm::answering("I'm unable to help with that."),
    );

    let err = h
        .pipeline
        .process(&key(), ExecutionContext::foreground())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Analysis(_)), "got: {err:?}");

    let record = h.store.get(&key()).await.unwrap().unwrap();
    assert_eq!(record.status, AnalysisStatus::Failed);
    assert!(record.failure_reason.unwrap().starts_with("analysis failed"));

    let llm_alert = h
        .notifier
        .sent()
        .into_iter()
        .find(|a| a.service == "llm_analysis")
        .expect("llm failure alerted");
    assert_eq!(llm_alert.error_type, "chunk_exhaustion");
}

#[tokio::test]
async fn completed_record_is_never_reprocessed() {
    let source = FakeSource::delivering(SourceVariant::DirectHtml, batch(3));
    let llm = ScriptedLlm::answering(&verdict(50.0));
    let h = harness(vec![source.clone()], llm.clone());

    h.pipeline
        .process(&key(), ExecutionContext::foreground())
        .await
        .unwrap();
    let outcome = h
        .pipeline
        .process(&key(), ExecutionContext::foreground())
        .await
        .unwrap();

    assert_eq!(outcome, ProcessOutcome::AlreadyCompleted);
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);

    let err = h
        .store
        .transition(&key(), AnalysisStatus::Processing)
        .await
        .unwrap_err();
    assert!(matches!(err, revtrust_db::DbError::StatusRegression { .. }));
}

#[tokio::test]
async fn concurrent_runs_claim_the_record_once() {
    let llm = ScriptedLlm::answering(&verdict(10.0));
    let h = harness(vec![], llm.clone());
    let mut fetched = ProductAnalysis::new_pending(key(), Utc::now());
    fetched.status = AnalysisStatus::Fetched;
    fetched.reviews = batch(5).reviews;
    h.store.insert(fetched).await;

    let (key_a, key_b) = (key(), key());
    let (first, second) = tokio::join!(h.pipeline.analyze(&key_a), h.pipeline.analyze(&key_b));

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(PipelineError::NotReady { .. }))));
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    assert_eq!(status_of(&h.store, &key()).await, AnalysisStatus::Completed);
}

#[tokio::test]
async fn empty_product_is_graded_unanalyzable() {
    let mut empty = batch(0);
    empty.total_count = Some(0);
    let llm = ScriptedLlm::answering(&verdict(0.0));
    let h = harness(vec![FakeSource::delivering(SourceVariant::DirectHtml, empty)], llm.clone());

    let outcome = h
        .pipeline
        .process(&key(), ExecutionContext::foreground())
        .await
        .unwrap();

    let ProcessOutcome::Completed(summary) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(summary.grade, Grade::U);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

#[tokio::test]
async fn foreground_defers_then_background_chain_lands_pending_analysis() {
    let h = harness(
        vec![FakeSource::deferring(SourceVariant::ManagedJob, batch(4))],
        ScriptedLlm::answering(&verdict(30.0)),
    );

    let outcome = h
        .pipeline
        .process(&key(), ExecutionContext::foreground())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Deferred {
            job_id: "job1".to_string()
        }
    );

    let status = h
        .pipeline
        .await_deferred(&key(), Duration::from_millis(10), 100)
        .await
        .unwrap();
    assert_eq!(status, AnalysisStatus::PendingAnalysis);

    let summary = h.pipeline.analyze(&key()).await.unwrap();
    assert_eq!(summary.grade, Grade::C);
    assert_eq!(status_of(&h.store, &key()).await, AnalysisStatus::Completed);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn failed_background_chain_is_alerted_once() {
    let h = harness(
        vec![FakeSource::deferred(SourceVariant::ManagedJob, Deferral::Fails, batch(4))],
        ScriptedLlm::answering(&verdict(30.0)),
    );
    // A failure of the same kind from hours ago is still in the 24h log; a
    // recovery recorded at submission time would mute the new one.
    let _ = h.alerter.policy().record_failure_at(
        "managed_job",
        "job_failed",
        "earlier job",
        Utc::now() - chrono::Duration::hours(5),
    );

    let outcome = h
        .pipeline
        .process(&key(), ExecutionContext::foreground())
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessOutcome::Deferred { .. }));

    let status = h
        .pipeline
        .await_deferred(&key(), Duration::from_millis(10), 100)
        .await
        .unwrap();
    assert_eq!(status, AnalysisStatus::Failed);

    let alert = wait_for_alert(&h.notifier, "managed_job").await;
    assert_eq!(alert.error_type, "job_failed");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn background_context_never_defers() {
    let h = harness(
        vec![FakeSource::deferring(SourceVariant::ManagedJob, batch(4))],
        ScriptedLlm::answering(&verdict(30.0)),
    );

    let outcome = h
        .pipeline
        .process(&key(), ExecutionContext::background())
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessOutcome::Completed(_)));
}

#[tokio::test]
async fn incomplete_metadata_is_enriched_in_background() {
    let mut bare = batch(3);
    bare.metadata = ProductMetadata::default();
    let h = harness_with(
        vec![FakeSource::delivering(SourceVariant::ThirdPartyApi, bare)],
        ScriptedLlm::answering(&verdict(0.0)),
        Some(Arc::new(TitleEnricher)),
    );

    h.pipeline
        .process(&key(), ExecutionContext::foreground())
        .await
        .unwrap();

    for _ in 0..100 {
        let record = h.store.get(&key()).await.unwrap().unwrap();
        if record.metadata.title.is_some() {
            assert_eq!(record.metadata.title.as_deref(), Some("Enriched Kettle"));
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("metadata was never enriched");
}

#[tokio::test]
async fn enrichment_failure_is_alerted() {
    let mut bare = batch(3);
    bare.metadata = ProductMetadata::default();
    let h = harness_with(
        vec![FakeSource::delivering(SourceVariant::ThirdPartyApi, bare)],
        ScriptedLlm::answering(&verdict(0.0)),
        Some(Arc::new(BlockedEnricher)),
    );

    let outcome = h
        .pipeline
        .process(&key(), ExecutionContext::foreground())
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessOutcome::Completed(_)));

    let alert = wait_for_alert(&h.notifier, revtrust_alerts::ENRICHMENT_SERVICE).await;
    assert_eq!(alert.error_type, "soft_block");
    assert_eq!(alert.severity, Severity::P3);
}

// ---------------------------------------------------------------------------
// Submission, workers and sweeps
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_rejects_bad_input() {
    let h = harness(vec![], ScriptedLlm::answering(&verdict(0.0)));
    let (queue, _pool) = spawn_workers(Arc::clone(&h.pipeline), 1, 4);

    let err = submit_for_analysis(h.store.as_ref(), &queue, "B0TESTKEY1", "zz")
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));

    let err = submit_for_analysis(h.store.as_ref(), &queue, "short", "us")
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
}

#[tokio::test]
async fn submitted_product_is_processed_by_workers() {
    let h = harness(
        vec![FakeSource::delivering(SourceVariant::DirectHtml, batch(5))],
        ScriptedLlm::answering(&verdict(5.0)),
    );
    let (queue, _pool) = spawn_workers(Arc::clone(&h.pipeline), 2, 16);

    let receipt = submit_for_analysis(h.store.as_ref(), &queue, "b0testkey1", "US")
        .await
        .unwrap();
    assert_eq!(receipt.product_id, "B0TESTKEY1");
    assert_eq!(receipt.country, "us");
    assert!(receipt.enqueued);
    assert_eq!(receipt.status, revtrust_core::PublicStatus::Processing);

    wait_for_status(&h.store, &key(), AnalysisStatus::Completed).await;

    let again = submit_for_analysis(h.store.as_ref(), &queue, "B0TESTKEY1", "us")
        .await
        .unwrap();
    assert!(!again.enqueued);
    assert_eq!(again.status, revtrust_core::PublicStatus::Completed);
    assert_eq!(again.public_id, receipt.public_id);
}

#[tokio::test]
async fn worker_reports_store_failures() {
    let h = harness(
        vec![FakeSource::failing_with(SourceVariant::DirectHtml, broken_store)],
        ScriptedLlm::answering(&verdict(0.0)),
    );
    let (queue, _pool) = spawn_workers(Arc::clone(&h.pipeline), 1, 4);

    submit_for_analysis(h.store.as_ref(), &queue, "B0TESTKEY1", "us")
        .await
        .unwrap();

    let alert = wait_for_alert(&h.notifier, revtrust_alerts::WORKER_SERVICE).await;
    assert_eq!(alert.error_type, "store");
    assert!(h.notifier.sent().iter().all(|a| a.service != "direct_html"));
}

#[tokio::test]
async fn submitting_a_failed_record_retries_it() {
    let h = harness(
        vec![FakeSource::delivering(SourceVariant::DirectHtml, batch(5))],
        ScriptedLlm::answering(&verdict(5.0)),
    );
    let mut failed = ProductAnalysis::new_pending(key(), Utc::now());
    failed.status = AnalysisStatus::Failed;
    failed.failure_reason = Some("all review sources failed".to_string());
    h.store.insert(failed).await;
    let (queue, _pool) = spawn_workers(Arc::clone(&h.pipeline), 1, 4);

    let receipt = submit_for_analysis(h.store.as_ref(), &queue, "B0TESTKEY1", "us")
        .await
        .unwrap();
    assert!(receipt.enqueued);
    assert_eq!(receipt.attempts, 1);

    wait_for_status(&h.store, &key(), AnalysisStatus::Completed).await;
}

#[tokio::test]
async fn pending_analysis_sweep_feeds_workers() {
    let h = harness(vec![], ScriptedLlm::answering(&verdict(70.0)));
    let mut waiting = ProductAnalysis::new_pending(key(), Utc::now());
    waiting.status = AnalysisStatus::PendingAnalysis;
    waiting.reviews = batch(5).reviews;
    h.store.insert(waiting).await;
    let (queue, _pool) = spawn_workers(Arc::clone(&h.pipeline), 1, 4);

    let queued = enqueue_pending_analysis(h.store.as_ref(), &queue, 50).await.unwrap();
    assert_eq!(queued, 1);

    wait_for_status(&h.store, &key(), AnalysisStatus::Completed).await;
    let record = h.store.get(&key()).await.unwrap().unwrap();
    assert_eq!(record.summary.unwrap().grade, Grade::F);
}

#[tokio::test]
async fn stalled_processing_records_are_failed() {
    let h = harness(vec![], ScriptedLlm::answering(&verdict(0.0)));
    let now = Utc::now();

    let stale_key = ProductKey::new("B0STALE001", "us");
    let mut stale = ProductAnalysis::new_pending(stale_key.clone(), now);
    stale.status = AnalysisStatus::Processing;
    stale.updated_at = now - chrono::Duration::minutes(45);
    h.store.insert(stale).await;

    let fresh_key = ProductKey::new("B0FRESH001", "us");
    let mut fresh = ProductAnalysis::new_pending(fresh_key.clone(), now);
    fresh.status = AnalysisStatus::Processing;
    fresh.updated_at = now - chrono::Duration::minutes(5);
    h.store.insert(fresh).await;

    let failed = fail_stalled(h.store.as_ref(), now, chrono::Duration::minutes(30), 100)
        .await
        .unwrap();
    assert_eq!(failed, 1);

    let record = h.store.get(&stale_key).await.unwrap().unwrap();
    assert_eq!(record.status, AnalysisStatus::Failed);
    assert_eq!(record.failure_reason.as_deref(), Some(STALL_REASON));
    assert_eq!(status_of(&h.store, &fresh_key).await, AnalysisStatus::Processing);
}
