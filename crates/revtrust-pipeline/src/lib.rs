//! Review acquisition and analysis pipeline.
//!
//! [`AcquisitionOrchestrator`] walks the configured review sources in order,
//! [`AnalysisRunner`] scores what was stored, and [`Pipeline`] ties the two
//! together behind one status-driven entry point. [`WorkQueue`] feeds the
//! background workers.

pub mod enrich;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod runner;
pub mod services;
pub mod submit;
pub mod sweeps;
pub mod worker;

pub use enrich::MetadataEnricher;
pub use error::PipelineError;
pub use orchestrator::{Acquired, Acquisition, AcquisitionOrchestrator};
pub use pipeline::{Pipeline, ProcessOutcome};
pub use runner::AnalysisRunner;
pub use services::{build_alerter, build_egress, build_orchestrator, build_services, Egress, Services};
pub use submit::{submit_for_analysis, SubmitReceipt};
pub use sweeps::{enqueue_pending_analysis, fail_stalled, STALL_REASON};
pub use worker::{spawn_workers, WorkQueue, WorkerPool};
