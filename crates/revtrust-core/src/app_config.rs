use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// The four interchangeable review acquisition strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceVariant {
    ManagedJob,
    DirectHtml,
    EndpointReplay,
    ThirdPartyApi,
}

impl SourceVariant {
    /// Canonical fallback order used when no explicit order is configured.
    pub const ALL: [SourceVariant; 4] = [
        SourceVariant::ManagedJob,
        SourceVariant::DirectHtml,
        SourceVariant::EndpointReplay,
        SourceVariant::ThirdPartyApi,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SourceVariant::ManagedJob => "managed_job",
            SourceVariant::DirectHtml => "direct_html",
            SourceVariant::EndpointReplay => "endpoint_replay",
            SourceVariant::ThirdPartyApi => "third_party_api",
        }
    }
}

impl std::fmt::Display for SourceVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "managed_job" => Ok(SourceVariant::ManagedJob),
            "direct_html" => Ok(SourceVariant::DirectHtml),
            "endpoint_replay" => Ok(SourceVariant::EndpointReplay),
            "third_party_api" => Ok(SourceVariant::ThirdPartyApi),
            other => Err(format!(
                "unknown source variant '{other}'; expected one of managed_job, direct_html, endpoint_replay, third_party_api"
            )),
        }
    }
}

/// HTTP scraping knobs shared by every source adapter.
#[derive(Debug, Clone)]
pub struct ScraperSettings {
    /// Overrides the per-country marketplace host (staging and tests).
    pub marketplace_base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub max_retries: u32,
    pub retry_backoff_base_ms: u64,
    pub page_delay_min_ms: u64,
    pub page_delay_max_ms: u64,
    pub max_pages: u32,
    pub max_reviews: usize,
    pub credential_cooldown_minutes: i64,
}

#[derive(Clone)]
pub struct JobApiSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
    pub async_mode: bool,
}

impl std::fmt::Debug for JobApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobApiSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("poll_max_attempts", &self.poll_max_attempts)
            .field("async_mode", &self.async_mode)
            .finish()
    }
}

#[derive(Clone)]
pub struct ReviewsApiSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl std::fmt::Debug for ReviewsApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewsApiSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

#[derive(Clone)]
pub struct LlmSettings {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ChunkSettings {
    pub chunk_size: usize,
    pub concurrency: usize,
    /// Highest tolerated share of failed chunks, in `0.0..=1.0`.
    pub failure_ceiling: f64,
    pub inter_chunk_delay_ms: u64,
    pub chunk_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub webhook_url: Option<String>,
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub egress_path: PathBuf,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub primary_source: SourceVariant,
    /// Full fallback order; always starts with `primary_source`.
    pub source_order: Vec<SourceVariant>,
    pub scraper: ScraperSettings,
    pub job_api: JobApiSettings,
    pub reviews_api: ReviewsApiSettings,
    pub llm: LlmSettings,
    pub chunking: ChunkSettings,
    pub alerts: AlertSettings,
    pub worker_concurrency: usize,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &"[redacted]")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("egress_path", &self.egress_path)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("primary_source", &self.primary_source)
            .field("source_order", &self.source_order)
            .field("scraper", &self.scraper)
            .field("job_api", &self.job_api)
            .field("reviews_api", &self.reviews_api)
            .field("llm", &self.llm)
            .field("chunking", &self.chunking)
            .field(
                "alerts.webhook_url",
                &self.alerts.webhook_url.as_ref().map(|_| "[redacted]"),
            )
            .field("worker_concurrency", &self.worker_concurrency)
            .finish()
    }
}
