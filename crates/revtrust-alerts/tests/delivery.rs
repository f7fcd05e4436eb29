//! Alert delivery through the webhook and log channels.

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use revtrust_alerts::{
    build_notifier, AlertError, AlertPolicy, Alerter, ImpactCatalogue, LogNotifier, Notifier,
    WebhookNotifier,
};
use revtrust_core::{AlertSettings, SourceVariant};

fn policy() -> AlertPolicy {
    AlertPolicy::new(ImpactCatalogue::new(SourceVariant::DirectHtml))
}

#[tokio::test]
async fn webhook_receives_alert_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/alerts"))
        .and(body_partial_json(json!({
            "alert": {
                "severity": "P3",
                "service": "direct_html",
                "error_type": "hard_block",
                "impact": {"tier": "primary", "revenue_impacting": true}
            }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(format!("{}/hooks/alerts", server.uri())).unwrap();
    let alerter = Alerter::new(policy(), Arc::new(notifier));

    let alert = alerter
        .failure("direct_html", "hard_block", "redirected to sign-in")
        .await
        .expect("first failure alerts");
    assert_eq!(alert.service, "direct_html");

    // Throttled repeat is neither returned nor posted.
    assert!(alerter
        .failure("direct_html", "hard_block", "redirected to sign-in")
        .await
        .is_none());
}

#[tokio::test]
async fn webhook_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(server.uri()).unwrap();
    let alert = policy()
        .record_failure("llm_analysis", "llm_api", "500 from provider")
        .unwrap();

    let err = notifier.send(&alert).await.unwrap_err();
    assert!(
        matches!(&err, AlertError::Webhook { status: 500, body } if body == "boom"),
        "got: {err:?}"
    );
}

#[tokio::test]
async fn delivery_failure_does_not_swallow_the_alert() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let alerter = Alerter::new(policy(), Arc::new(WebhookNotifier::new(server.uri()).unwrap()));
    let alert = alerter.failure("managed_job", "job_submit", "402").await;
    assert!(alert.is_some());
}

#[tokio::test]
async fn recovery_mutes_following_failures() {
    let alerter = Alerter::new(policy(), Arc::new(LogNotifier));
    assert!(alerter.failure("direct_html", "timeout", "slow").await.is_some());

    alerter.recovery("direct_html");

    assert!(alerter.failure("direct_html", "timeout", "slow").await.is_none());
    assert!(alerter.failure("direct_html", "timeout", "slow").await.is_none());
}

#[tokio::test]
async fn missing_webhook_url_falls_back_to_log() {
    let notifier = build_notifier(&AlertSettings { webhook_url: None }).unwrap();
    let alert = policy().record_failure("direct_html", "timeout", "slow").unwrap();
    notifier.send(&alert).await.unwrap();
}
