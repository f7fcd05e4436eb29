use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("LLM response had no message content")]
    EmptyResponse,

    #[error("LLM client is not configured: {0} is missing")]
    NotConfigured(&'static str),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    /// The model answered but nothing usable could be recovered from it.
    #[error("unusable LLM response: {reason}")]
    InvalidResponse { reason: String },

    #[error("chunk {chunk} timed out after {secs}s")]
    ChunkTimeout { chunk: usize, secs: u64 },

    #[error("{failed} of {total} chunks failed (ceiling {ceiling})")]
    TooManyChunkFailures {
        failed: usize,
        total: usize,
        ceiling: f64,
    },
}

impl AnalysisError {
    /// Stable label used as the alert `error_type`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Llm(LlmError::Http(e)) if e.is_timeout() => "timeout",
            AnalysisError::Llm(LlmError::Http(_)) => "transient_network",
            AnalysisError::Llm(LlmError::Api { status: 429, .. }) => "rate_limited",
            AnalysisError::Llm(LlmError::NotConfigured(_)) => "config",
            AnalysisError::Llm(_) => "llm_api",
            AnalysisError::InvalidResponse { .. } => "data_shape",
            AnalysisError::ChunkTimeout { .. } => "timeout",
            AnalysisError::TooManyChunkFailures { .. } => "chunk_exhaustion",
        }
    }
}
