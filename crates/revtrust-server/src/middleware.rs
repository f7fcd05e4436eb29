use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, RETRY_AFTER},
        HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_REQUEST_ID_LEN: usize = 64;

/// Correlation id for one API call, stored as a request extension and echoed
/// in every response envelope.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// The configured key that authenticated a request, by position in
/// `REVTRUST_API_KEYS`. `None` when auth is disabled. Rate limits are kept
/// per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApiClient(pub Option<usize>);

/// Bearer token settings used by [`require_bearer_auth`].
#[derive(Debug, Clone)]
pub struct AuthState {
    api_keys: Arc<Vec<String>>,
    pub enabled: bool,
}

impl AuthState {
    /// Builds auth config from `REVTRUST_API_KEYS` (comma-separated bearer tokens).
    ///
    /// # Errors
    ///
    /// Fails outside development when no keys are configured.
    pub fn from_env(is_development: bool) -> anyhow::Result<Self> {
        let raw = std::env::var("REVTRUST_API_KEYS").unwrap_or_default();
        Self::from_keys(&raw, is_development)
    }

    /// Parses a comma-separated key list. In development an empty list
    /// disables auth; anywhere else it is an error.
    ///
    /// # Errors
    ///
    /// Fails outside development when `raw` holds no keys.
    pub fn from_keys(raw: &str, is_development: bool) -> anyhow::Result<Self> {
        let mut keys: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        keys.sort();
        keys.dedup();

        if keys.is_empty() {
            if is_development {
                tracing::warn!(
                    "REVTRUST_API_KEYS not set; bearer auth disabled in development environment"
                );
                return Ok(Self {
                    api_keys: Arc::new(Vec::new()),
                    enabled: false,
                });
            }

            anyhow::bail!(
                "REVTRUST_API_KEYS is required outside development; provide comma-separated bearer tokens"
            );
        }

        Ok(Self {
            api_keys: Arc::new(keys),
            enabled: true,
        })
    }

    /// Index of the key matching `token`. Every key is compared so the
    /// time taken does not depend on which one matched.
    fn client_for(&self, token: &str) -> Option<ApiClient> {
        self.api_keys
            .iter()
            .enumerate()
            .fold(None, |found, (index, key)| {
                if bool::from(key.as_bytes().ct_eq(token.as_bytes())) {
                    Some(ApiClient(Some(index)))
                } else {
                    found
                }
            })
    }
}

/// Fixed window per [`ApiClient`], shared by every protected route.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    max_requests: usize,
    window: Duration,
    windows: Arc<Mutex<HashMap<ApiClient, (Instant, usize)>>>,
}

impl RateLimitState {
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Counts one request from `client`. `Err` carries how long until its
    /// window resets.
    async fn admit_at(&self, client: ApiClient, now: Instant) -> Result<(), Duration> {
        let mut windows = self.windows.lock().await;
        windows.retain(|_, (opened, _)| now.duration_since(*opened) < self.window);

        let (opened, used) = windows.entry(client).or_insert((now, 0));
        if *used >= self.max_requests {
            return Err(self.window.saturating_sub(now.duration_since(*opened)));
        }
        *used += 1;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct MiddlewareErrorBody {
    error: MiddlewareError,
}

#[derive(Debug, Serialize)]
struct MiddlewareError {
    code: &'static str,
    message: &'static str,
}

fn reject(status: StatusCode, code: &'static str, message: &'static str) -> Response {
    (
        status,
        Json(MiddlewareErrorBody {
            error: MiddlewareError { code, message },
        }),
    )
        .into_response()
}

/// Client-supplied ids are kept only when short and made of
/// `[A-Za-z0-9._-]`; anything else is replaced so it cannot pollute logs.
fn accepted_request_id(value: Option<&HeaderValue>) -> Option<String> {
    let raw = value?.to_str().ok()?.trim();
    let well_formed = !raw.is_empty()
        && raw.len() <= MAX_REQUEST_ID_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    well_formed.then(|| raw.to_string())
}

/// Tags the request with a [`RequestId`], echoes it as `x-request-id` and
/// logs the outcome of the call.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = accepted_request_id(req.headers().get(REQUEST_ID_HEADER))
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    req.extensions_mut().insert(RequestId(id.clone()));
    let mut res = next.run(req).await;

    tracing::debug!(
        request_id = %id,
        %method,
        path,
        status = res.status().as_u16(),
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "request handled"
    );
    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert(REQUEST_ID_HEADER, val);
    }
    res
}

/// Rejects requests without a configured bearer token and records the
/// matching [`ApiClient`] for the rate limiter.
pub async fn require_bearer_auth(
    State(auth): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Response {
    if !auth.enabled {
        req.extensions_mut().insert(ApiClient(None));
        return next.run(req).await;
    }

    let client = extract_bearer_token(req.headers().get(AUTHORIZATION))
        .and_then(|token| auth.client_for(token));
    match client {
        Some(client) => {
            req.extensions_mut().insert(client);
            next.run(req).await
        }
        None => reject(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid bearer token",
        ),
    }
}

/// Runs after [`require_bearer_auth`]; unauthenticated calls never reach it.
pub async fn enforce_rate_limit(
    State(rate_limit): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let client = req
        .extensions()
        .get::<ApiClient>()
        .copied()
        .unwrap_or(ApiClient(None));

    match rate_limit.admit_at(client, Instant::now()).await {
        Ok(()) => next.run(req).await,
        Err(retry_in) => {
            tracing::warn!(client = ?client.0, "rate limit exceeded");
            let mut res = reject(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "rate limit exceeded",
            );
            let seconds = retry_in.as_secs().max(1);
            if let Ok(val) = HeaderValue::from_str(&seconds.to_string()) {
                res.headers_mut().insert(RETRY_AFTER, val);
            }
            res
        }
    }
}

fn extract_bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|s| !s.trim().is_empty())
}
