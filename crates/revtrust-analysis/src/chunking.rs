//! Context-aware chunking: partition, fan out, tolerate partial failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use revtrust_core::{ChunkSettings, ReviewRecord};

use crate::aggregate::ChunkResult;
use crate::error::AnalysisError;
use crate::stats::CorpusStats;

/// What every chunk call sees besides its own reviews.
#[derive(Debug, Clone)]
pub struct ChunkContext {
    /// Zero-based position of the chunk.
    pub index: usize,
    pub total_chunks: usize,
    pub stats: Arc<CorpusStats>,
}

/// Successful chunk verdicts in chunk order, plus the failure tally.
#[derive(Debug, Clone)]
pub struct ChunkRun {
    pub results: Vec<ChunkResult>,
    pub failed: usize,
    pub total: usize,
    pub stats: Arc<CorpusStats>,
}

/// Splits `reviews` into `⌈n / size⌉` order-preserving chunks.
#[must_use]
pub fn partition(reviews: &[ReviewRecord], size: usize) -> Vec<Vec<ReviewRecord>> {
    reviews.chunks(size.max(1)).map(<[ReviewRecord]>::to_vec).collect()
}

#[derive(Debug, Clone)]
pub struct ChunkingEngine {
    settings: ChunkSettings,
}

impl ChunkingEngine {
    #[must_use]
    pub fn new(settings: ChunkSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &ChunkSettings {
        &self.settings
    }

    /// Runs `process` once per chunk.
    ///
    /// With `concurrency > 1` chunks are dispatched through a bounded pool and
    /// no inter-chunk delay applies; otherwise they run one after another with
    /// the configured delay between them. A chunk that errors or exceeds the
    /// timeout counts as failed.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::TooManyChunkFailures`] when the failed share
    /// exceeds the ceiling or nothing succeeded.
    pub async fn run<F, Fut>(
        &self,
        reviews: &[ReviewRecord],
        process: F,
    ) -> Result<ChunkRun, AnalysisError>
    where
        F: Fn(Vec<ReviewRecord>, ChunkContext) -> Fut,
        Fut: Future<Output = Result<ChunkResult, AnalysisError>>,
    {
        let stats = Arc::new(CorpusStats::compute(reviews));
        let chunks = partition(reviews, self.settings.chunk_size);
        let total = chunks.len();
        let timeout = Duration::from_secs(self.settings.chunk_timeout_secs);

        tracing::info!(
            reviews = reviews.len(),
            chunks = total,
            chunk_size = self.settings.chunk_size,
            concurrency = self.settings.concurrency,
            "starting chunked analysis"
        );

        let calls = chunks.into_iter().enumerate().map(|(index, chunk)| {
            let ctx = ChunkContext {
                index,
                total_chunks: total,
                stats: Arc::clone(&stats),
            };
            let call = process(chunk, ctx);
            let secs = self.settings.chunk_timeout_secs;
            async move {
                let outcome = match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(AnalysisError::ChunkTimeout { chunk: index, secs }),
                };
                (index, outcome)
            }
        });

        let mut outcomes: Vec<(usize, Result<ChunkResult, AnalysisError>)> =
            if self.settings.concurrency > 1 {
                stream::iter(calls)
                    .buffer_unordered(self.settings.concurrency)
                    .collect()
                    .await
            } else {
                let delay = Duration::from_millis(self.settings.inter_chunk_delay_ms);
                let mut sequential = Vec::with_capacity(total);
                for (position, call) in calls.enumerate() {
                    if position > 0 && !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    sequential.push(call.await);
                }
                sequential
            };
        outcomes.sort_by_key(|(index, _)| *index);

        let mut results = Vec::with_capacity(total);
        let mut failed = 0usize;
        for (index, outcome) in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(err) => {
                    failed += 1;
                    tracing::warn!(chunk = index, total, error = %err, kind = err.kind(), "chunk failed");
                }
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let failed_share = if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64
        };
        if failed_share > self.settings.failure_ceiling || (total > 0 && results.is_empty()) {
            tracing::error!(failed, total, ceiling = self.settings.failure_ceiling, "chunk failure ceiling exceeded");
            return Err(AnalysisError::TooManyChunkFailures {
                failed,
                total,
                ceiling: self.settings.failure_ceiling,
            });
        }
        if failed > 0 {
            tracing::warn!(failed, total, "continuing with partial chunk results");
        }

        Ok(ChunkRun {
            results,
            failed,
            total,
            stats,
        })
    }
}

#[cfg(test)]
#[path = "chunking_test.rs"]
mod tests;
