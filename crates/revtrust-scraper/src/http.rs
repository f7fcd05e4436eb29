//! Outbound marketplace HTTP: per-route clients, cookies, and rotation on blocks.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::Client;

use revtrust_core::{marketplace_host, ScraperSettings};

use crate::block::{detect_block, BlockSignal};
use crate::credentials::{Credential, CredentialPool};
use crate::error::ScraperError;
use crate::retry::retry_with_backoff;
use crate::routes::{Route, RouteSelector};

/// One marketplace request. `form` switches the request to a form POST.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub url: String,
    pub form: Option<Vec<(String, String)>>,
    pub referer: Option<String>,
    pub headers: Vec<(String, String)>,
    pub xhr: bool,
}

impl PageRequest {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub final_url: String,
    pub body: String,
}

/// Body of a successful rotated fetch plus what carried it.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: String,
    pub credential: Option<usize>,
    pub route: String,
}

/// Builds reqwest clients per route and sends marketplace requests.
pub struct MarketplaceHttp {
    direct: Client,
    timeout: Duration,
    user_agent: String,
}

impl MarketplaceHttp {
    /// # Errors
    ///
    /// Returns [`ScraperError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(timeout_secs: u64, user_agent: &str) -> Result<Self, ScraperError> {
        let timeout = Duration::from_secs(timeout_secs);
        let direct = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            direct,
            timeout,
            user_agent: user_agent.to_string(),
        })
    }

    fn client_for(&self, route: &Route) -> Result<Client, ScraperError> {
        let Some(proxy_url) = route.proxy_url() else {
            return Ok(self.direct.clone());
        };
        let proxy = reqwest::Proxy::all(&proxy_url)?;
        Ok(Client::builder()
            .timeout(self.timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(&self.user_agent)
            .proxy(proxy)
            .build()?)
    }

    /// Sends `request` through `route`. Never inspects the body.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::Http`] on network or proxy failure.
    pub async fn send(
        &self,
        request: &PageRequest,
        credential: Option<&Credential>,
        route: &Route,
    ) -> Result<PageResponse, ScraperError> {
        let client = self.client_for(route)?;
        let mut builder = match &request.form {
            Some(form) => client.post(&request.url).form(form),
            None => client.get(&request.url),
        };
        builder = builder
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(reqwest::header::CACHE_CONTROL, "no-cache");
        if let Some(referer) = &request.referer {
            builder = builder.header(reqwest::header::REFERER, referer);
        }
        if request.xhr {
            builder = builder.header("X-Requested-With", "XMLHttpRequest");
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(credential) = credential {
            builder = builder.header(reqwest::header::COOKIE, credential.cookie_header());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await?;
        Ok(PageResponse {
            status,
            final_url,
            body,
        })
    }
}

/// Storefront origin for `country`, honouring the configured override.
///
/// # Errors
///
/// Returns [`ScraperError::InvalidUrl`] for a country without a marketplace.
pub fn marketplace_origin(settings: &ScraperSettings, country: &str) -> Result<String, ScraperError> {
    if let Some(base) = &settings.marketplace_base_url {
        return Ok(base.trim_end_matches('/').to_string());
    }
    marketplace_host(country)
        .map(|host| format!("https://{host}"))
        .ok_or_else(|| ScraperError::InvalidUrl {
            url: country.to_string(),
            reason: "no marketplace for country".to_string(),
        })
}

/// Credential pool, route selector and HTTP client shared by the page-based
/// adapters.
pub struct EgressSession {
    pub http: MarketplaceHttp,
    pub credentials: Arc<CredentialPool>,
    pub routes: Arc<RouteSelector>,
    pub settings: ScraperSettings,
}

impl EgressSession {
    /// # Errors
    ///
    /// Returns [`ScraperError::Http`] if the HTTP client cannot be built.
    pub fn new(
        settings: ScraperSettings,
        credentials: Arc<CredentialPool>,
        routes: Arc<RouteSelector>,
    ) -> Result<Self, ScraperError> {
        let http = MarketplaceHttp::new(settings.request_timeout_secs, &settings.user_agent)?;
        Ok(Self {
            http,
            credentials,
            routes,
            settings,
        })
    }

    /// Fetches one page, rotating credential and route after every soft block
    /// or network failure, up to the configured retry cap.
    ///
    /// A login redirect benches the credential and fails at once. Running out
    /// of retries on soft blocks benches the last credential and is reported
    /// as a hard block.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::HardBlock`], [`ScraperError::NotFound`],
    /// [`ScraperError::UnexpectedStatus`] or [`ScraperError::Http`].
    pub async fn fetch(&self, request: &PageRequest) -> Result<Fetched, ScraperError> {
        self.fetch_with_retries(request, self.settings.max_retries)
            .await
    }

    /// [`fetch`](Self::fetch) with an explicit retry cap. With `0`, the first
    /// soft block benches the credential and returns a hard block.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch).
    pub async fn fetch_with_retries(
        &self,
        request: &PageRequest,
        max_retries: u32,
    ) -> Result<Fetched, ScraperError> {
        let tried_routes: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let last_credential: Mutex<Option<usize>> = Mutex::new(None);
        let tried = &tried_routes;
        let last = &last_credential;
        let cooldown = self.settings.credential_cooldown_minutes;

        let result = retry_with_backoff(
            max_retries,
            self.settings.retry_backoff_base_ms,
            || async move {
                let exclude = tried.lock().unwrap_or_else(PoisonError::into_inner).clone();
                let route = self.routes.select_excluding(&exclude);
                let credential = self.credentials.next();
                *last.lock().unwrap_or_else(PoisonError::into_inner) =
                    credential.as_ref().map(|c| c.index);

                let response = match self.http.send(request, credential.as_ref(), &route).await {
                    Ok(response) => response,
                    Err(err) => {
                        self.routes.report_failure(&route.name, &err.to_string());
                        tried
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(route.name.clone());
                        return Err(err);
                    }
                };

                match detect_block(response.status, &response.final_url, &response.body) {
                    Some(BlockSignal::Hard(reason)) => {
                        if let Some(c) = &credential {
                            self.credentials.mark_unhealthy(c.index, &reason, cooldown);
                        }
                        self.routes.report_failure(&route.name, &reason);
                        Err(ScraperError::HardBlock { reason })
                    }
                    Some(BlockSignal::Soft(indicator)) => {
                        tracing::warn!(
                            url = %request.url,
                            route = %route.name,
                            credential = ?credential.as_ref().map(|c| c.index),
                            indicator = %indicator,
                            "soft block, rotating"
                        );
                        self.routes.report_failure(&route.name, &indicator);
                        tried
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(route.name.clone());
                        Err(ScraperError::SoftBlock {
                            url: request.url.clone(),
                            indicator,
                        })
                    }
                    None if response.status == 404 => Err(ScraperError::NotFound {
                        url: request.url.clone(),
                    }),
                    None if !(200..300).contains(&response.status) => {
                        self.routes
                            .report_failure(&route.name, &format!("http {}", response.status));
                        Err(ScraperError::UnexpectedStatus {
                            status: response.status,
                            url: request.url.clone(),
                        })
                    }
                    None => {
                        self.routes.report_success(&route.name);
                        Ok(Fetched {
                            body: response.body,
                            credential: credential.map(|c| c.index),
                            route: route.name,
                        })
                    }
                }
            },
        )
        .await;

        match result {
            Err(ScraperError::SoftBlock { indicator, .. }) => {
                let reason = format!("repeated soft blocks ({indicator})");
                let last_index = *last_credential.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(index) = last_index {
                    self.credentials.mark_unhealthy(index, &reason, cooldown);
                }
                Err(ScraperError::HardBlock { reason })
            }
            other => other,
        }
    }
}
