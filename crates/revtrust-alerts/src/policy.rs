//! Rolling failure log and the escalation decision.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::impact::{ImpactCatalogue, ServiceImpact};
use crate::remediation::remediation_for;
use crate::severity::{Severity, RATE_THRESHOLDS};

const LOG_RETENTION_HOURS: i64 = 24;
const RECOVERY_SUPPRESSION_MINUTES: i64 = 30;

/// A notification that survived throttling and recovery suppression.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    /// Stable across repeats of the same `(service, error_type, severity)`.
    pub fingerprint: String,
    pub severity: Severity,
    /// Severity before the tier downgrade.
    pub rate_severity: Severity,
    pub service: String,
    pub error_type: String,
    pub message: String,
    pub detail: String,
    pub failures_in_window: usize,
    pub window_minutes: i64,
    pub impact: ServiceImpact,
    pub remediation: String,
    pub raised_at: DateTime<Utc>,
}

type Key = (String, String);

#[derive(Debug, Default)]
struct PolicyState {
    failures: HashMap<Key, VecDeque<DateTime<Utc>>>,
    recoveries: HashMap<Key, DateTime<Utc>>,
    sent: HashMap<(String, String, Severity), DateTime<Utc>>,
}

impl PolicyState {
    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - Duration::hours(LOG_RETENTION_HOURS);
        self.failures.retain(|_, log| {
            while log.front().is_some_and(|ts| *ts <= horizon) {
                log.pop_front();
            }
            !log.is_empty()
        });
        let recovery_horizon = now - Duration::minutes(RECOVERY_SUPPRESSION_MINUTES);
        self.recoveries.retain(|_, at| *at > recovery_horizon);
        self.sent
            .retain(|(_, _, severity), at| *at > now - severity.throttle_window());
    }
}

/// Decides whether a failure becomes an alert.
///
/// State lives behind a mutex held only for the bookkeeping of one call.
#[derive(Debug)]
pub struct AlertPolicy {
    catalogue: ImpactCatalogue,
    state: Mutex<PolicyState>,
}

impl AlertPolicy {
    #[must_use]
    pub fn new(catalogue: ImpactCatalogue) -> Self {
        Self {
            catalogue,
            state: Mutex::new(PolicyState::default()),
        }
    }

    #[must_use]
    pub fn catalogue(&self) -> &ImpactCatalogue {
        &self.catalogue
    }

    /// Records one failure and returns the alert to send, if any.
    #[must_use]
    pub fn record_failure(&self, service: &str, error_type: &str, detail: &str) -> Option<Alert> {
        self.record_failure_at(service, error_type, detail, Utc::now())
    }

    /// Like [`record_failure`](Self::record_failure) with an explicit clock.
    ///
    /// The rate severity is the first threshold met, tightest first. It is
    /// then lowered for the service's tier. `None` when a recovery for the
    /// same key was recorded within 30 minutes or an identical alert went out
    /// inside the severity's throttle window.
    #[must_use]
    pub fn record_failure_at(
        &self,
        service: &str,
        error_type: &str,
        detail: &str,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let key: Key = (service.to_string(), error_type.to_string());
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.prune(now);

        let log = state.failures.entry(key.clone()).or_default();
        log.push_back(now);

        let matched = RATE_THRESHOLDS.iter().find_map(|(severity, min, window)| {
            let since = now - Duration::minutes(*window);
            let count = log.iter().filter(|ts| **ts > since).count();
            (count >= *min).then_some((*severity, count, *window))
        });
        let Some((rate_severity, failures_in_window, window_minutes)) = matched else {
            return None;
        };

        if let Some(recovered_at) = state.recoveries.get(&key) {
            tracing::debug!(
                service,
                error_type,
                recovered_at = %recovered_at,
                "alert suppressed after recent recovery"
            );
            return None;
        }

        let impact = self.catalogue.impact(service);
        let severity = rate_severity.downgrade(impact.tier.downgrade_steps());

        let sent_key = (key.0.clone(), key.1.clone(), severity);
        if let Some(last) = state.sent.get(&sent_key) {
            tracing::debug!(
                service,
                error_type,
                severity = %severity,
                last_sent = %last,
                "alert throttled"
            );
            return None;
        }
        state.sent.insert(sent_key, now);
        drop(state);

        Some(Alert {
            fingerprint: fingerprint(service, error_type, severity),
            severity,
            rate_severity,
            service: service.to_string(),
            error_type: error_type.to_string(),
            message: format!(
                "{service} {error_type}: {failures_in_window} failure(s) in the last {window_minutes} min"
            ),
            detail: detail.to_string(),
            failures_in_window,
            window_minutes,
            remediation: remediation_for(service, error_type).to_string(),
            impact,
            raised_at: now,
        })
    }

    /// Suppresses alerts for `(service, error_type)` for the next 30 minutes.
    pub fn record_recovery(&self, service: &str, error_type: &str) {
        self.record_recovery_at(service, error_type, Utc::now());
    }

    pub fn record_recovery_at(&self, service: &str, error_type: &str, now: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .recoveries
            .insert((service.to_string(), error_type.to_string()), now);
        tracing::debug!(service, error_type, "recovery recorded");
    }

    /// Records a recovery for every error type `service` has failed with
    /// inside the retention window. Returns how many keys were touched.
    pub fn record_service_recovery(&self, service: &str) -> usize {
        self.record_service_recovery_at(service, Utc::now())
    }

    pub fn record_service_recovery_at(&self, service: &str, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.prune(now);
        let keys: Vec<Key> = state
            .failures
            .keys()
            .filter(|(s, _)| s == service)
            .cloned()
            .collect();
        for key in &keys {
            state.recoveries.insert(key.clone(), now);
        }
        if !keys.is_empty() {
            tracing::info!(service, error_types = keys.len(), "service recovered");
        }
        keys.len()
    }

    /// Failures currently held for `(service, error_type)`.
    #[must_use]
    pub fn failure_count(&self, service: &str, error_type: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .failures
            .get(&(service.to_string(), error_type.to_string()))
            .map_or(0, VecDeque::len)
    }
}

fn fingerprint(service: &str, error_type: &str, severity: Severity) -> String {
    let digest = Sha256::digest(format!("{service}|{error_type}|{severity}").as_bytes());
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}

#[cfg(test)]
#[path = "policy_test.rs"]
mod tests;
