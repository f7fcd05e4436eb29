use std::sync::Arc;

use crate::notifier::Notifier;
use crate::policy::{Alert, AlertPolicy};

/// [`AlertPolicy`] wired to a delivery channel.
///
/// Delivery failures are logged and never propagate to the reporter.
pub struct Alerter {
    policy: AlertPolicy,
    notifier: Arc<dyn Notifier>,
}

impl Alerter {
    #[must_use]
    pub fn new(policy: AlertPolicy, notifier: Arc<dyn Notifier>) -> Self {
        Self { policy, notifier }
    }

    #[must_use]
    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Records a failure and delivers the resulting alert, if any.
    pub async fn failure(&self, service: &str, error_type: &str, detail: &str) -> Option<Alert> {
        let alert = self.policy.record_failure(service, error_type, detail)?;
        if let Err(e) = self.notifier.send(&alert).await {
            tracing::warn!(
                error = %e,
                service,
                error_type,
                severity = %alert.severity,
                "failed to deliver alert"
            );
        }
        Some(alert)
    }

    /// Records a success for `service`, muting its recent failure types.
    pub fn recovery(&self, service: &str) {
        self.policy.record_service_recovery(service);
    }
}
