//! End-to-end scoring of one product's reviews.

use std::sync::Arc;

use revtrust_core::{AnalysisSummary, ChunkSettings, Grade, ReviewRecord};

use crate::aggregate::{adjusted_rating, aggregate_chunks};
use crate::chunking::ChunkingEngine;
use crate::error::AnalysisError;
use crate::llm::ChatCompletion;
use crate::prompt::{chunk_prompt, SYSTEM_PROMPT};
use crate::response::parse_chunk_response;

pub struct ReviewAnalyzer {
    llm: Arc<dyn ChatCompletion>,
    engine: ChunkingEngine,
    max_tokens: u32,
}

impl ReviewAnalyzer {
    #[must_use]
    pub fn new(llm: Arc<dyn ChatCompletion>, chunking: ChunkSettings, max_tokens: u32) -> Self {
        Self {
            llm,
            engine: ChunkingEngine::new(chunking),
            max_tokens,
        }
    }

    /// Scores `reviews` and grades the product.
    ///
    /// Reviews without a rating or body text are skipped. With nothing left
    /// to score the product is graded unanalyzable and no model call is made.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::TooManyChunkFailures`] when too many chunk
    /// calls fail.
    pub async fn analyze(&self, reviews: &[ReviewRecord]) -> Result<AnalysisSummary, AnalysisError> {
        let scorable: Vec<ReviewRecord> = reviews.iter().filter(|r| r.is_scorable()).cloned().collect();
        let skipped = reviews.len() - scorable.len();
        if skipped > 0 {
            tracing::debug!(skipped, "reviews without rating or text left out of scoring");
        }
        if scorable.is_empty() {
            tracing::info!(reviews = reviews.len(), "no scorable reviews, grading unanalyzable");
            return Ok(AnalysisSummary::unanalyzable(
                "No reviews with both a rating and text were available to analyze.",
            ));
        }

        let llm = &self.llm;
        let max_tokens = self.max_tokens;
        let run = self
            .engine
            .run(&scorable, |chunk, ctx| async move {
                let prompt = chunk_prompt(&chunk, &ctx);
                let raw = llm.complete(SYSTEM_PROMPT, &prompt, max_tokens).await?;
                let result = parse_chunk_response(&raw, &chunk)?;
                tracing::debug!(
                    chunk = ctx.index,
                    reviews = chunk.len(),
                    fake_percentage = result.fake_percentage,
                    "chunk scored"
                );
                Ok::<_, AnalysisError>(result)
            })
            .await?;

        let aggregate = aggregate_chunks(&run.results, &run.stats);
        let fake_percentage = (aggregate.fake_percentage * 10.0).round() / 10.0;
        let (marketplace_rating, adjusted) = adjusted_rating(&scorable, fake_percentage);
        let grade = Grade::from_fake_percentage(fake_percentage);

        tracing::info!(
            reviews = scorable.len(),
            chunks = run.total,
            failed_chunks = run.failed,
            fake_percentage,
            grade = %grade,
            confidence = %aggregate.confidence,
            "analysis complete"
        );

        Ok(AnalysisSummary {
            fake_percentage: Some(fake_percentage),
            grade,
            confidence: Some(aggregate.confidence),
            explanation: aggregate.explanation,
            marketplace_rating,
            adjusted_rating: adjusted,
            fake_examples: aggregate.fake_examples,
            key_patterns: aggregate.key_patterns,
        })
    }
}
