use chrono::TimeZone;

use revtrust_core::SourceVariant;

use super::*;
use crate::impact::ServiceTier;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn policy() -> AlertPolicy {
    AlertPolicy::new(ImpactCatalogue::new(SourceVariant::DirectHtml))
}

/// Records `n` failures one second apart starting at `start`, returning the
/// alerts that were raised.
fn burst(policy: &AlertPolicy, service: &str, n: i64, start: DateTime<Utc>) -> Vec<Alert> {
    (0..n)
        .filter_map(|i| {
            policy.record_failure_at(service, "soft_block", "blocked", start + Duration::seconds(i))
        })
        .collect()
}

#[test]
fn single_failure_is_p3_with_impact_and_remediation() {
    let policy = policy();
    let alert = policy
        .record_failure_at("direct_html", "hard_block", "sign-in redirect", t0())
        .expect("first failure alerts");

    assert_eq!(alert.severity, Severity::P3);
    assert_eq!(alert.window_minutes, 60);
    assert_eq!(alert.impact.tier, ServiceTier::Primary);
    assert!(alert.remediation.contains("cookies"));
    assert_eq!(alert.detail, "sign-in redirect");
    assert_eq!(alert.fingerprint.len(), 16);
}

#[test]
fn escalates_through_thresholds() {
    let policy = policy();
    let severities: Vec<Severity> = burst(&policy, "direct_html", 10, t0())
        .into_iter()
        .map(|a| a.severity)
        .collect();
    // 1st -> P3, 3rd -> P2, 5th -> P1, 10th -> P0; repeats are throttled.
    assert_eq!(
        severities,
        vec![Severity::P3, Severity::P2, Severity::P1, Severity::P0]
    );
}

#[test]
fn second_failure_inside_p1_throttle_is_suppressed() {
    let policy = policy();
    // Build up to the fifth failure, which crosses the P1 threshold.
    let before = burst(&policy, "direct_html", 4, t0());
    assert!(before.iter().all(|a| a.severity > Severity::P1));

    let first = policy.record_failure_at("direct_html", "soft_block", "blocked", t0() + Duration::seconds(30));
    let second = policy.record_failure_at("direct_html", "soft_block", "blocked", t0() + Duration::seconds(150));

    let dispatched: Vec<Alert> = [first, second].into_iter().flatten().collect();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].severity, Severity::P1);
}

#[test]
fn fallback_tier_downgrades_p0_to_p2() {
    let primary = policy();
    let fallback = AlertPolicy::new(
        ImpactCatalogue::new(SourceVariant::DirectHtml).with_tier("direct_html", ServiceTier::Fallback),
    );

    let primary_last = burst(&primary, "direct_html", 10, t0()).pop().unwrap();
    let fallback_last = burst(&fallback, "direct_html", 10, t0()).pop().unwrap();

    assert_eq!(primary_last.severity, Severity::P0);
    assert_eq!(fallback_last.rate_severity, Severity::P0);
    assert_eq!(fallback_last.severity, Severity::P2);
}

#[test]
fn recovery_suppresses_for_thirty_minutes() {
    let policy = policy();
    assert!(policy.record_failure_at("direct_html", "timeout", "slow", t0()).is_some());
    policy.record_recovery_at("direct_html", "timeout", t0() + Duration::minutes(1));

    let during = policy.record_failure_at("direct_html", "timeout", "slow", t0() + Duration::minutes(20));
    assert!(during.is_none());

    let _ = policy.record_failure_at("direct_html", "timeout", "slow", t0() + Duration::minutes(25));

    // Recovery expired; 3 failures inside 15 minutes is a fresh P2.
    let after = policy.record_failure_at("direct_html", "timeout", "slow", t0() + Duration::minutes(32));
    assert_eq!(after.map(|a| a.severity), Some(Severity::P2));
}

#[test]
fn service_recovery_only_touches_logged_error_types() {
    let policy = policy();
    assert_eq!(policy.record_service_recovery_at("direct_html", t0()), 0);

    let _ = policy.record_failure_at("direct_html", "timeout", "slow", t0());
    let _ = policy.record_failure_at("direct_html", "soft_block", "captcha", t0());
    assert_eq!(
        policy.record_service_recovery_at("direct_html", t0() + Duration::minutes(1)),
        2
    );

    assert!(policy
        .record_failure_at("direct_html", "timeout", "slow", t0() + Duration::minutes(2))
        .is_none());
    assert!(policy
        .record_failure_at("managed_job", "timeout", "slow", t0() + Duration::minutes(2))
        .is_some());
}

#[test]
fn failures_older_than_a_day_are_forgotten() {
    let policy = policy();
    let _ = burst(&policy, "direct_html", 3, t0());
    assert_eq!(policy.failure_count("direct_html", "soft_block"), 3);

    let later = t0() + Duration::hours(25);
    let alert = policy
        .record_failure_at("direct_html", "soft_block", "blocked", later)
        .expect("P3 throttle has lapsed");
    assert_eq!(alert.failures_in_window, 1);
    assert_eq!(policy.failure_count("direct_html", "soft_block"), 1);
}

#[test]
fn distinct_error_types_are_tracked_separately() {
    let policy = policy();
    assert!(policy.record_failure_at("direct_html", "timeout", "x", t0()).is_some());
    assert!(policy.record_failure_at("direct_html", "data_shape", "x", t0()).is_some());
}
