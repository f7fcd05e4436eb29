//! Review authenticity scoring.
//!
//! Splits a product's reviews into chunks, asks a chat-completion model to
//! judge each chunk against corpus-wide statistics, and folds the chunk
//! verdicts into one fake percentage, grade and confidence.

pub mod aggregate;
pub mod analyzer;
pub mod chunking;
pub mod error;
pub mod json_recovery;
pub mod llm;
pub mod prompt;
pub mod response;
pub mod stats;

pub use aggregate::{adjusted_rating, aggregate_chunks, Aggregate, ChunkResult};
pub use analyzer::ReviewAnalyzer;
pub use chunking::{partition, ChunkContext, ChunkRun, ChunkingEngine};
pub use error::{AnalysisError, LlmError};
pub use json_recovery::{recover_json, recover_json_with};
pub use llm::{ChatCompletion, OpenAiCompatibleClient};
pub use response::parse_chunk_response;
pub use stats::CorpusStats;
