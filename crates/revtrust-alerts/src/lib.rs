//! Failure-rate based alert escalation.
//!
//! Adapters and the analysis stage report failures keyed by
//! `(service, error_type)`. [`AlertPolicy`] turns the rolling failure rate
//! into a severity, adjusts it for the service's business-impact tier and
//! drops alerts that are throttled or follow a recent recovery. Surviving
//! alerts go out through a [`Notifier`].

pub mod alerter;
pub mod error;
pub mod impact;
pub mod notifier;
pub mod policy;
pub mod remediation;
pub mod severity;

pub use alerter::Alerter;
pub use error::AlertError;
pub use impact::{
    ImpactCatalogue, ServiceImpact, ServiceTier, ENRICHMENT_SERVICE, LLM_SERVICE, WORKER_SERVICE,
};
pub use notifier::{build_notifier, LogNotifier, Notifier, WebhookNotifier};
pub use policy::{Alert, AlertPolicy};
pub use remediation::remediation_for;
pub use severity::Severity;
