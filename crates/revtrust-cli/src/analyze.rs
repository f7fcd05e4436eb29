//! `analyze` and `fetch` command handlers.
//!
//! `analyze` runs the full pipeline in the foreground against Postgres.
//! `fetch` is a dry run: it acquires reviews and prints them, writing nothing.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use revtrust_core::{
    normalize_country, normalize_product_id, AnalysisStatus, AnalysisSummary, AppConfig,
    ExecutionContext, ProductKey, ReviewBatch, SourceVariant,
};
use revtrust_db::{AnalysisStore, MemoryAnalysisStore, PgAnalysisStore};
use revtrust_pipeline::{
    build_alerter, build_egress, build_orchestrator, build_services, ProcessOutcome,
};

const SNIPPET_CHARS: usize = 80;

pub(crate) fn parse_key(product_id: &str, country: &str) -> anyhow::Result<ProductKey> {
    Ok(ProductKey::new(
        normalize_product_id(product_id)?,
        normalize_country(country)?,
    ))
}

/// Acquires and grades one product, waiting out a deferred managed job.
///
/// # Errors
///
/// Returns an error if the database is unreachable, the LLM key is missing,
/// every source fails, or the analysis itself fails.
pub(crate) async fn run_analyze(
    config: &AppConfig,
    product_id: &str,
    country: &str,
) -> anyhow::Result<()> {
    let key = parse_key(product_id, country)?;

    let pool_config = revtrust_db::PoolConfig::from_app_config(config);
    let pool = revtrust_db::connect_pool(&config.database_url, pool_config).await?;
    let store: Arc<dyn AnalysisStore> = Arc::new(PgAnalysisStore::new(pool));
    let services = build_services(config, Arc::clone(&store))?;
    let pipeline = &services.pipeline;

    let summary = match pipeline.process(&key, ExecutionContext::foreground()).await? {
        ProcessOutcome::Completed(summary) => summary,
        ProcessOutcome::AlreadyCompleted => {
            println!("{key} was already analyzed; showing stored result");
            store
                .get(&key)
                .await?
                .and_then(|record| record.summary)
                .with_context(|| format!("{key} is completed but has no stored summary"))?
        }
        ProcessOutcome::Deferred { job_id } => {
            println!("managed job {job_id} submitted for {key}; waiting for results");
            let status = pipeline
                .await_deferred(
                    &key,
                    Duration::from_secs(config.job_api.poll_interval_secs),
                    config.job_api.poll_max_attempts,
                )
                .await?;
            if status == AnalysisStatus::Failed {
                let reason = store
                    .get(&key)
                    .await?
                    .and_then(|record| record.failure_reason)
                    .unwrap_or_else(|| "unknown".to_string());
                anyhow::bail!("managed job for {key} failed: {reason}");
            }
            pipeline.analyze(&key).await?
        }
    };

    tracing::info!(%key, grade = %summary.grade, "analysis finished");
    print!("{}", format_summary(&key, &summary));
    Ok(())
}

/// Dry-run acquisition. With `source` only that adapter is tried; otherwise
/// the configured fallback order is walked.
///
/// # Errors
///
/// Returns an error if the egress file is invalid or no source delivers.
pub(crate) async fn run_fetch(
    config: &AppConfig,
    product_id: &str,
    country: &str,
    source: Option<SourceVariant>,
    show: usize,
) -> anyhow::Result<()> {
    let key = parse_key(product_id, country)?;
    let egress = build_egress(config)?;

    let (variant, batch) = match source {
        Some(variant) => {
            let adapter = revtrust_scraper::build_adapter(variant, config, &egress.session)?;
            (variant, adapter.fetch_reviews(&key).await?)
        }
        None => {
            let scratch: Arc<dyn AnalysisStore> = Arc::new(MemoryAnalysisStore::new());
            let alerter = build_alerter(config)?;
            let orchestrator = build_orchestrator(config, &egress, scratch, alerter)?;
            orchestrator.fetch_preview(&key).await?
        }
    };

    tracing::info!(%key, source = %variant, reviews = batch.reviews.len(), "fetch finished");
    print!("{}", format_batch(&key, variant, &batch, show));
    Ok(())
}

pub(crate) fn format_summary(key: &ProductKey, summary: &AnalysisSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{key}: grade {}", summary.grade);
    if let Some(pct) = summary.fake_percentage {
        let _ = writeln!(out, "  likely fake:  {pct:.1}%");
    }
    if let Some(confidence) = summary.confidence {
        let _ = writeln!(out, "  confidence:   {confidence}");
    }
    if let (Some(rating), Some(adjusted)) = (summary.marketplace_rating, summary.adjusted_rating) {
        let _ = writeln!(out, "  rating:       {rating:.2} (adjusted {adjusted:.2})");
    }
    let _ = writeln!(out, "  {}", summary.explanation);
    for example in &summary.fake_examples {
        let _ = writeln!(
            out,
            "  * \"{}\" ({})",
            snippet(&example.text),
            example.reason
        );
    }
    out
}

pub(crate) fn format_batch(
    key: &ProductKey,
    variant: SourceVariant,
    batch: &ReviewBatch,
    show: usize,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{key} via {variant}");
    if let Some(title) = &batch.metadata.title {
        let _ = writeln!(out, "  product:      {title}");
    }
    let total = batch
        .total_count
        .map_or_else(|| "unknown".to_string(), |n| n.to_string());
    let _ = writeln!(
        out,
        "  reviews:      {} fetched, {total} reported",
        batch.reviews.len()
    );
    let verified = batch.reviews.iter().filter(|r| r.verified_purchase).count();
    let incentivized = batch.reviews.iter().filter(|r| r.incentivized).count();
    let scorable = batch.reviews.iter().filter(|r| r.is_scorable()).count();
    let _ = writeln!(
        out,
        "  scorable:     {scorable} ({verified} verified, {incentivized} incentivized)"
    );
    for review in batch.reviews.iter().take(show) {
        let stars = review
            .rating
            .map_or_else(|| "?".to_string(), |r| r.to_string());
        let body = review.body.as_deref().map(snippet).unwrap_or_default();
        let _ = writeln!(out, "  [{stars}*] {body}");
    }
    out
}

fn snippet(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SNIPPET_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(SNIPPET_CHARS).collect();
        format!("{cut}...")
    }
}
