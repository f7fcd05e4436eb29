//! Delivery channels for alerts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use revtrust_core::AlertSettings;

use crate::error::AlertError;
use crate::policy::Alert;
use crate::severity::Severity;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// # Errors
    ///
    /// Returns [`AlertError`] when the channel rejects or cannot receive the
    /// alert.
    async fn send(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Writes alerts to the log only. Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        match alert.severity {
            Severity::P0 | Severity::P1 => tracing::error!(
                severity = %alert.severity,
                service = %alert.service,
                error_type = %alert.error_type,
                fingerprint = %alert.fingerprint,
                remediation = %alert.remediation,
                "{}",
                alert.message
            ),
            Severity::P2 | Severity::P3 => tracing::warn!(
                severity = %alert.severity,
                service = %alert.service,
                error_type = %alert.error_type,
                fingerprint = %alert.fingerprint,
                remediation = %alert.remediation,
                "{}",
                alert.message
            ),
        }
        Ok(())
    }
}

/// Posts alerts as JSON to an incoming-webhook URL.
///
/// The body carries a human-readable `text` line plus the full alert under
/// `alert`.
pub struct WebhookNotifier {
    webhook_url: String,
    http: reqwest::Client,
}

impl WebhookNotifier {
    /// # Errors
    ///
    /// Returns [`AlertError::Http`] if the HTTP client cannot be built.
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, AlertError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            webhook_url: webhook_url.into(),
            http,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let text = format!(
            "[{}] {}\nImpact: {} ({:?} tier)\nDetail: {}\nSuggested action: {}",
            alert.severity,
            alert.message,
            alert.impact.description,
            alert.impact.tier,
            alert.detail,
            alert.remediation,
        );
        let payload = json!({ "text": text, "alert": alert });

        let resp = self.http.post(&self.webhook_url).json(&payload).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AlertError::Webhook { status, body });
        }
        tracing::debug!(fingerprint = %alert.fingerprint, "alert delivered to webhook");
        Ok(())
    }
}

/// Webhook notifier when a URL is configured, log-only otherwise.
///
/// # Errors
///
/// Returns [`AlertError::Http`] if the webhook client cannot be built.
pub fn build_notifier(settings: &AlertSettings) -> Result<Arc<dyn Notifier>, AlertError> {
    match settings.webhook_url.as_deref() {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(url)?)),
        None => {
            tracing::info!("REVTRUST_ALERT_WEBHOOK_URL not set; alerts go to the log only");
            Ok(Arc::new(LogNotifier))
        }
    }
}
