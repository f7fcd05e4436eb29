use thiserror::Error;

use revtrust_core::SourceVariant;
use revtrust_db::DbError;

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// CAPTCHA, throttling banner or 429/503 on an otherwise reachable page.
    #[error("soft block at {url}: {indicator}")]
    SoftBlock { url: String, indicator: String },

    /// Login redirect or repeated soft blocks. The credential has been benched.
    #[error("hard block: {reason}")]
    HardBlock { reason: String },

    #[error("endpoint not found: {url}")]
    NotFound { url: String },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("could not parse {context}: {reason}")]
    Parse { context: String, reason: String },

    #[error("{variant} returned no reviews although the listing reports {reported}")]
    EmptyResult { variant: SourceVariant, reported: u32 },

    #[error("job submission rejected with status {status}: {message}")]
    JobSubmit { status: u16, message: String },

    #[error("job {job_id} ended with status {status}")]
    JobFailed { job_id: String, status: String },

    #[error("job {job_id} still running after {attempts} polls (last row count {last_row_count:?})")]
    PollExhausted {
        job_id: String,
        attempts: u32,
        last_row_count: Option<u64>,
    },

    #[error("background chain for job {job_id} did not finish: {reason}")]
    BackgroundTask { job_id: String, reason: String },

    #[error("{variant} is not configured: {missing}")]
    NotConfigured {
        variant: SourceVariant,
        missing: &'static str,
    },

    #[error("invalid URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("store error: {0}")]
    Store(#[from] DbError),
}

impl ScraperError {
    /// Stable label used as the alert `error_type`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ScraperError::Http(e) if e.is_timeout() => "timeout",
            ScraperError::Http(_) => "transient_network",
            ScraperError::SoftBlock { .. } => "soft_block",
            ScraperError::HardBlock { .. } => "hard_block",
            ScraperError::Deserialize { .. }
            | ScraperError::Parse { .. }
            | ScraperError::EmptyResult { .. } => "data_shape",
            ScraperError::NotFound { .. } => "not_found",
            ScraperError::UnexpectedStatus { .. } => "unexpected_status",
            ScraperError::JobSubmit { .. } => "job_submit",
            ScraperError::JobFailed { .. } => "job_failed",
            ScraperError::PollExhausted { .. } => "poll_exhausted",
            ScraperError::BackgroundTask { .. } => "background_task",
            ScraperError::NotConfigured { .. } | ScraperError::InvalidUrl { .. } => "config",
            ScraperError::Store(_) => "store",
        }
    }

    /// Whether a local retry (after rotation and back-off) may succeed.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            ScraperError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            ScraperError::SoftBlock { .. } => true,
            ScraperError::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
