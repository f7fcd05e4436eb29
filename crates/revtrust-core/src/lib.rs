pub mod analysis;
pub mod app_config;
pub mod config;
pub mod egress;
pub mod execution;
pub mod marketplace;
pub mod reviews;

pub use analysis::{
    AnalysisStatus, AnalysisSummary, Confidence, FakeExample, Grade, PublicStatus,
};
pub use app_config::{
    AlertSettings, AppConfig, ChunkSettings, Environment, JobApiSettings, LlmSettings,
    ReviewsApiSettings, ScraperSettings, SourceVariant,
};
pub use config::{load_app_config, load_app_config_from_env};
pub use egress::{
    load_egress, parse_egress, CredentialConfig, EgressFile, RouteConfig, RouteKind, MAX_CREDENTIALS,
};
pub use execution::ExecutionContext;
pub use marketplace::{
    marketplace_host, normalize_country, normalize_product_id, SUPPORTED_COUNTRIES,
};
pub use reviews::{ProductKey, ProductMetadata, ReviewBatch, ReviewRecord};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read egress file {path}: {source}")]
    EgressFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse egress file: {0}")]
    EgressFileParse(#[source] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),
}
