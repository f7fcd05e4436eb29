use revtrust_core::{AnalysisStatus, ConfigError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] revtrust_db::DbError),

    #[error(transparent)]
    Scraper(#[from] revtrust_scraper::ScraperError),

    #[error(transparent)]
    Analysis(#[from] revtrust_analysis::AnalysisError),

    #[error(transparent)]
    Llm(#[from] revtrust_analysis::LlmError),

    #[error(transparent)]
    Alert(#[from] revtrust_alerts::AlertError),

    #[error("no analysis record for {0}")]
    NotFound(String),

    /// Every configured source failed; the record is now `failed`.
    #[error("{key}: {reason}")]
    AllSourcesFailed { key: String, reason: String },

    #[error("{key} is {status}; nothing to do until it moves on")]
    NotReady { key: String, status: AnalysisStatus },

    #[error("{key} still {status} after waiting for the background job")]
    DeferredTimeout { key: String, status: AnalysisStatus },

    #[error("work queue is full")]
    QueueFull,

    #[error("work queue is closed")]
    QueueClosed,
}

impl PipelineError {
    /// `error_type` for a background job failure that no other stage has
    /// reported. `None` for exhausted sources and failed analyses, which the
    /// sources and the LLM stage alert on themselves, and for busy records.
    #[must_use]
    pub fn unreported_kind(&self) -> Option<&'static str> {
        match self {
            PipelineError::AllSourcesFailed { .. }
            | PipelineError::Analysis(_)
            | PipelineError::NotReady { .. } => None,
            PipelineError::Config(_) => Some("config"),
            PipelineError::Store(_) => Some("store"),
            PipelineError::Scraper(err) => Some(err.kind()),
            PipelineError::Llm(_) => Some("llm_client"),
            PipelineError::Alert(_) => Some("alert_delivery"),
            PipelineError::NotFound(_) => Some("missing_record"),
            PipelineError::DeferredTimeout { .. } => Some("deferred_timeout"),
            PipelineError::QueueFull | PipelineError::QueueClosed => Some("queue"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_reported_failures_are_not_reported_again() {
        let exhausted = PipelineError::AllSourcesFailed {
            key: "us/B000000001".to_string(),
            reason: "all review sources failed".to_string(),
        };
        assert_eq!(exhausted.unreported_kind(), None);

        let busy = PipelineError::NotReady {
            key: "us/B000000001".to_string(),
            status: AnalysisStatus::Processing,
        };
        assert_eq!(busy.unreported_kind(), None);
    }

    #[test]
    fn store_failures_are_reported() {
        let err = PipelineError::Store(revtrust_db::DbError::NotFound);
        assert_eq!(err.unreported_kind(), Some("store"));
        assert_eq!(PipelineError::QueueFull.unreported_kind(), Some("queue"));
    }
}
