//! Egress route selection: scoring, custom-route preference and sticky sessions.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Serialize;

use revtrust_core::{RouteConfig, RouteKind};

const RELIABILITY_WEIGHT: f64 = 0.7;
const COST_WEIGHT: f64 = 0.3;
const RECENT_FAILURE_MINUTES: i64 = 5;
const SESSION_TTL_MINUTES: i64 = 10;
const MIN_OUTCOMES_FOR_OBSERVED: u32 = 5;
const SESSION_ID_LEN: usize = 8;

/// A route chosen for one request.
#[derive(Clone)]
pub struct Route {
    pub name: String,
    pub kind: RouteKind,
    url: Option<String>,
    pub session_id: Option<String>,
}

impl Route {
    #[must_use]
    pub fn direct() -> Self {
        Self {
            name: "direct".to_string(),
            kind: RouteKind::Direct,
            url: None,
            session_id: None,
        }
    }

    /// Proxy URL with the sticky session id folded into the username
    /// (`user-session-<id>`). `None` for direct routes.
    #[must_use]
    pub fn proxy_url(&self) -> Option<String> {
        let raw = self.url.as_deref()?;
        let Some(session) = self.session_id.as_deref() else {
            return Some(raw.to_string());
        };
        match reqwest::Url::parse(raw) {
            Ok(mut url) if !url.username().is_empty() => {
                let user = format!("{}-session-{session}", url.username());
                if url.set_username(&user).is_ok() {
                    Some(url.to_string())
                } else {
                    Some(raw.to_string())
                }
            }
            _ => Some(raw.to_string()),
        }
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("url", &self.url.as_ref().map(|_| "[redacted]"))
            .field("session_id", &self.session_id)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
struct RouteStats {
    successes: u32,
    failures: u32,
    last_failure: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct SelectorState {
    stats: HashMap<String, RouteStats>,
    sessions: HashMap<String, (String, DateTime<Utc>)>,
}

/// Per-route health as reported on the egress endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RouteHealth {
    pub name: String,
    pub kind: String,
    pub configured_reliability: f64,
    pub effective_reliability: f64,
    pub cost_per_use: f64,
    pub successes: u32,
    pub failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug)]
pub struct RouteSelector {
    routes: Vec<RouteConfig>,
    state: Mutex<SelectorState>,
}

impl RouteSelector {
    /// An empty route list is treated as a single direct route.
    #[must_use]
    pub fn new(routes: Vec<RouteConfig>) -> Self {
        Self {
            routes,
            state: Mutex::new(SelectorState::default()),
        }
    }

    #[must_use]
    pub fn select(&self) -> Route {
        self.select_excluding_at(&[], Utc::now())
    }

    /// Best route not named in `exclude`. Falls back to ignoring the
    /// exclusion list when it covers every route.
    #[must_use]
    pub fn select_excluding(&self, exclude: &[String]) -> Route {
        self.select_excluding_at(exclude, Utc::now())
    }

    #[must_use]
    pub fn select_excluding_at(&self, exclude: &[String], now: DateTime<Utc>) -> Route {
        if self.routes.is_empty() {
            return Route::direct();
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let mut candidates: Vec<&RouteConfig> = self
            .routes
            .iter()
            .filter(|r| !exclude.contains(&r.name))
            .collect();
        if candidates.is_empty() {
            candidates = self.routes.iter().collect();
        }

        let max_cost = candidates
            .iter()
            .map(|r| r.cost_per_use)
            .fold(0.0_f64, f64::max);

        let healthy_custom: Vec<&RouteConfig> = candidates
            .iter()
            .copied()
            .filter(|r| r.kind == RouteKind::Custom && !recently_failed(&state, &r.name, now))
            .collect();
        let pool = if healthy_custom.is_empty() {
            candidates
        } else {
            healthy_custom
        };

        let mut best: Option<(&RouteConfig, f64)> = None;
        for route in pool {
            let score = score(route, effective_reliability(&state, route), max_cost);
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((route, score));
            }
        }
        let Some((chosen, score)) = best else {
            return Route::direct();
        };

        let session_id = chosen
            .sticky_sessions
            .then(|| session_for(&mut state, &chosen.name, now));
        tracing::debug!(route = %chosen.name, kind = %chosen.kind, score, "selected egress route");

        Route {
            name: chosen.name.clone(),
            kind: chosen.kind,
            url: chosen.url.clone(),
            session_id,
        }
    }

    pub fn report_success(&self, route: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.stats.entry(route.to_string()).or_default().successes += 1;
    }

    /// Records a failure and rotates the route's sticky session, if any.
    pub fn report_failure(&self, route: &str, error: &str) {
        self.report_failure_at(route, error, Utc::now());
    }

    pub fn report_failure_at(&self, route: &str, error: &str, now: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let stats = state.stats.entry(route.to_string()).or_default();
        stats.failures += 1;
        stats.last_failure = Some(now);
        stats.last_error = Some(error.to_string());
        if state.sessions.remove(route).is_some() {
            tracing::debug!(route, "rotated sticky session after failure");
        }
    }

    /// Forces a fresh session id on the next selection of `route`.
    pub fn rotate_session(&self, route: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.sessions.remove(route);
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<RouteHealth> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.routes
            .iter()
            .map(|r| {
                let stats = state.stats.get(&r.name).cloned().unwrap_or_default();
                RouteHealth {
                    name: r.name.clone(),
                    kind: r.kind.to_string(),
                    configured_reliability: r.reliability,
                    effective_reliability: effective_reliability(&state, r),
                    cost_per_use: r.cost_per_use,
                    successes: stats.successes,
                    failures: stats.failures,
                    last_failure: stats.last_failure,
                    last_error: stats.last_error,
                }
            })
            .collect()
    }
}

fn score(route: &RouteConfig, reliability: f64, max_cost: f64) -> f64 {
    let inverse_cost = if max_cost > 0.0 {
        1.0 - route.cost_per_use / max_cost
    } else {
        1.0
    };
    reliability * RELIABILITY_WEIGHT + inverse_cost * COST_WEIGHT
}

/// Custom routes switch to their observed success ratio once enough outcomes exist.
fn effective_reliability(state: &SelectorState, route: &RouteConfig) -> f64 {
    if route.kind != RouteKind::Custom {
        return route.reliability;
    }
    match state.stats.get(&route.name) {
        Some(s) if s.successes + s.failures >= MIN_OUTCOMES_FOR_OBSERVED => {
            f64::from(s.successes) / f64::from(s.successes + s.failures)
        }
        _ => route.reliability,
    }
}

fn recently_failed(state: &SelectorState, route: &str, now: DateTime<Utc>) -> bool {
    state
        .stats
        .get(route)
        .and_then(|s| s.last_failure)
        .is_some_and(|at| now - at < Duration::minutes(RECENT_FAILURE_MINUTES))
}

fn session_for(state: &mut SelectorState, route: &str, now: DateTime<Utc>) -> String {
    if let Some((id, created)) = state.sessions.get(route) {
        if now - *created < Duration::minutes(SESSION_TTL_MINUTES) {
            return id.clone();
        }
    }
    let id: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect();
    state.sessions.insert(route.to_string(), (id.clone(), now));
    id
}
