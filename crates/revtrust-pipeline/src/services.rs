//! Builds the runtime object graph from [`AppConfig`].

use std::sync::Arc;

use revtrust_alerts::{build_notifier, AlertPolicy, Alerter, ImpactCatalogue};
use revtrust_analysis::{OpenAiCompatibleClient, ReviewAnalyzer};
use revtrust_core::{load_egress, AppConfig};
use revtrust_db::AnalysisStore;
use revtrust_scraper::{
    build_adapters, CredentialPool, EgressSession, ProductPageEnricher, RouteSelector,
};

use crate::error::PipelineError;
use crate::orchestrator::AcquisitionOrchestrator;
use crate::pipeline::Pipeline;
use crate::runner::AnalysisRunner;

/// Shared egress state: credentials, routes and the session that uses them.
pub struct Egress {
    pub credentials: Arc<CredentialPool>,
    pub routes: Arc<RouteSelector>,
    pub session: Arc<EgressSession>,
}

/// Everything a long-running process needs.
pub struct Services {
    pub pipeline: Arc<Pipeline>,
    pub egress: Egress,
    pub alerter: Arc<Alerter>,
}

/// Loads the egress file and builds the shared session.
///
/// # Errors
///
/// [`PipelineError::Config`] if the egress file is unreadable or invalid,
/// [`PipelineError::Scraper`] if the HTTP client cannot be built.
pub fn build_egress(config: &AppConfig) -> Result<Egress, PipelineError> {
    let egress = load_egress(&config.egress_path)?;
    let credentials = Arc::new(CredentialPool::new(&egress.credentials));
    let routes = Arc::new(RouteSelector::new(egress.routes_or_direct()));
    if credentials.is_empty() {
        tracing::warn!(
            path = %config.egress_path.display(),
            "no credentials configured; marketplace requests go out without session cookies"
        );
    }
    let session = Arc::new(EgressSession::new(
        config.scraper.clone(),
        Arc::clone(&credentials),
        Arc::clone(&routes),
    )?);
    Ok(Egress {
        credentials,
        routes,
        session,
    })
}

/// # Errors
///
/// [`PipelineError::Alert`] if the webhook client cannot be built.
pub fn build_alerter(config: &AppConfig) -> Result<Arc<Alerter>, PipelineError> {
    let notifier = build_notifier(&config.alerts)?;
    let policy = AlertPolicy::new(ImpactCatalogue::new(config.primary_source));
    Ok(Arc::new(Alerter::new(policy, notifier)))
}

/// Orchestrator over the configured source order, with page enrichment.
///
/// # Errors
///
/// [`PipelineError::Scraper`] if an adapter's HTTP client cannot be built.
pub fn build_orchestrator(
    config: &AppConfig,
    egress: &Egress,
    store: Arc<dyn AnalysisStore>,
    alerter: Arc<Alerter>,
) -> Result<AcquisitionOrchestrator, PipelineError> {
    let adapters = build_adapters(config, &egress.session)?;
    let enricher = Arc::new(ProductPageEnricher::new(Arc::clone(&egress.session)));
    Ok(AcquisitionOrchestrator::new(adapters, store, alerter).with_enricher(enricher))
}

/// Full pipeline including the LLM client.
///
/// # Errors
///
/// [`PipelineError::Llm`] when `REVTRUST_LLM_API_KEY` is missing, plus any
/// error from [`build_egress`], [`build_alerter`] or [`build_orchestrator`].
pub fn build_services(
    config: &AppConfig,
    store: Arc<dyn AnalysisStore>,
) -> Result<Services, PipelineError> {
    let egress = build_egress(config)?;
    let alerter = build_alerter(config)?;
    let orchestrator = build_orchestrator(config, &egress, Arc::clone(&store), Arc::clone(&alerter))?;

    let llm = Arc::new(OpenAiCompatibleClient::new(&config.llm)?);
    let analyzer = ReviewAnalyzer::new(llm, config.chunking.clone(), config.llm.max_tokens);
    let runner = AnalysisRunner::new(Arc::clone(&store), analyzer, Arc::clone(&alerter));

    tracing::info!(
        sources = ?orchestrator.sources(),
        credentials = egress.credentials.len(),
        model = %config.llm.model,
        "pipeline ready"
    );

    Ok(Services {
        pipeline: Arc::new(Pipeline::new(store, orchestrator, runner)),
        egress,
        alerter,
    })
}
