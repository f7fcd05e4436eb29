//! Endpoint-replay variant: bootstrap a session from the first listing page,
//! then page through the internal AJAX endpoint it advertises.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use revtrust_core::{ProductKey, ReviewBatch, ReviewRecord, SourceVariant};

use crate::error::ScraperError;
use crate::http::{marketplace_origin, EgressSession, PageRequest};
use crate::parse::{parse_review_blocks, parse_review_page};
use crate::retry::polite_delay;

use super::{ensure_not_silently_empty, DirectHtmlAdapter, SourceAdapter};

const PAGE_SIZE: u32 = 10;
const CSRF_HEADER: &str = "anti-csrftoken-a2z";

/// Endpoint and token pulled from the `cr-state-object` blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayState {
    pub ajax_url: String,
    pub csrf_token: String,
}

#[derive(Debug, Deserialize)]
struct StateBlob {
    #[serde(rename = "reviewsAjaxUrl")]
    ajax_url: Option<String>,
    #[serde(rename = "reviewsCsrfToken")]
    csrf_token: Option<String>,
}

/// Extracts the AJAX endpoint and anti-forgery token. `None` if either is missing.
#[must_use]
pub fn extract_replay_state(html: &str) -> Option<ReplayState> {
    let re = Regex::new(r#"(?is)id\s*=\s*"cr-state-object"[^>]*data-state\s*=\s*"([^"]+)""#)
        .expect("valid state object regex");
    let raw = re.captures(html)?.get(1)?.as_str();
    let json = raw
        .replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&amp;", "&");
    let blob: StateBlob = serde_json::from_str(&json).ok()?;
    match (blob.ajax_url, blob.csrf_token) {
        (Some(ajax_url), Some(csrf_token)) if !ajax_url.is_empty() && !csrf_token.is_empty() => {
            Some(ReplayState {
                ajax_url,
                csrf_token,
            })
        }
        _ => None,
    }
}

/// Joins the HTML fragments carried by an `&&&`-delimited AJAX response.
///
/// Each segment is a JSON array such as `["append", "#cm_cr-review_list", "<div …>"]`.
#[must_use]
pub fn extract_ajax_fragments(body: &str) -> String {
    body.split("&&&")
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| serde_json::from_str::<Vec<serde_json::Value>>(segment).ok())
        .filter(|parts| {
            matches!(
                parts.first().and_then(serde_json::Value::as_str),
                Some("append" | "update")
            )
        })
        .filter_map(|parts| parts.get(2).and_then(|v| v.as_str()).map(str::to_string))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct EndpointReplayAdapter {
    session: Arc<EgressSession>,
    fallback: DirectHtmlAdapter,
}

impl EndpointReplayAdapter {
    #[must_use]
    pub fn new(session: Arc<EgressSession>, fallback: DirectHtmlAdapter) -> Self {
        Self { session, fallback }
    }

    async fn fall_back(&self, key: &ProductKey, why: &str) -> Result<ReviewBatch, ScraperError> {
        tracing::warn!(
            product_id = %key.product_id,
            country = %key.country,
            reason = why,
            "endpoint replay unavailable, falling back to direct html"
        );
        self.fallback.fetch_reviews(key).await
    }

    async fn replay_pages(
        &self,
        origin: &str,
        key: &ProductKey,
        state: &ReplayState,
        batch: &mut ReviewBatch,
        seen: &mut HashSet<String>,
    ) -> Result<(), ScraperError> {
        let settings = &self.session.settings;
        let endpoint = if state.ajax_url.starts_with("http") {
            state.ajax_url.clone()
        } else {
            format!("{origin}{}", state.ajax_url)
        };
        let referer = DirectHtmlAdapter::reviews_url(origin, &key.product_id, 1);

        for page in 2..=settings.max_pages {
            if batch.reviews.len() >= settings.max_reviews {
                break;
            }
            polite_delay(settings.page_delay_min_ms, settings.page_delay_max_ms).await;

            let request = PageRequest {
                url: endpoint.clone(),
                form: Some(vec![
                    ("sortBy".to_string(), "recent".to_string()),
                    ("reviewerType".to_string(), "all_reviews".to_string()),
                    ("pageNumber".to_string(), page.to_string()),
                    ("pageSize".to_string(), PAGE_SIZE.to_string()),
                    ("asin".to_string(), key.product_id.clone()),
                    ("scope".to_string(), format!("reviewsAjax{page}")),
                ]),
                referer: Some(referer.clone()),
                headers: vec![(CSRF_HEADER.to_string(), state.csrf_token.clone())],
                xhr: true,
            };
            // No local retries: a CAPTCHA here benches the credential and
            // sends us to the fallback.
            let fetched = self.session.fetch_with_retries(&request, 0).await?;
            let fresh: Vec<ReviewRecord> = parse_review_blocks(&extract_ajax_fragments(&fetched.body))
                .into_iter()
                .filter(|r| seen.insert(r.id.clone()))
                .collect();
            tracing::debug!(
                product_id = %key.product_id,
                page,
                parsed = fresh.len(),
                "replayed review page"
            );
            if fresh.is_empty() {
                break;
            }
            let remaining = settings.max_reviews.saturating_sub(batch.reviews.len());
            batch.reviews.extend(fresh.into_iter().take(remaining));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceAdapter for EndpointReplayAdapter {
    fn variant(&self) -> SourceVariant {
        SourceVariant::EndpointReplay
    }

    async fn fetch_reviews(&self, key: &ProductKey) -> Result<ReviewBatch, ScraperError> {
        let settings = &self.session.settings;
        let origin = marketplace_origin(settings, &key.country)?;

        let bootstrap = PageRequest {
            referer: Some(DirectHtmlAdapter::product_url(&origin, &key.product_id)),
            ..PageRequest::get(DirectHtmlAdapter::reviews_url(&origin, &key.product_id, 1))
        };
        let fetched = match self.session.fetch_with_retries(&bootstrap, 0).await {
            Ok(fetched) => fetched,
            Err(err @ (ScraperError::HardBlock { .. } | ScraperError::SoftBlock { .. })) => {
                return self.fall_back(key, &err.to_string()).await;
            }
            Err(err) => return Err(err),
        };

        let Some(state) = extract_replay_state(&fetched.body) else {
            return self.fall_back(key, "bootstrap page has no endpoint/token pair").await;
        };

        let first = parse_review_page(&fetched.body);
        let mut seen: HashSet<String> = HashSet::new();
        let mut batch = ReviewBatch {
            reviews: first
                .reviews
                .into_iter()
                .filter(|r| seen.insert(r.id.clone()))
                .take(settings.max_reviews)
                .collect(),
            metadata: first.metadata,
            total_count: first.total_count,
        };

        if let Err(err) = self
            .replay_pages(&origin, key, &state, &mut batch, &mut seen)
            .await
        {
            return match err {
                ScraperError::HardBlock { .. } | ScraperError::SoftBlock { .. } => {
                    self.fall_back(key, &err.to_string()).await
                }
                other => Err(other),
            };
        }

        ensure_not_silently_empty(self.variant(), &batch)?;
        tracing::info!(
            product_id = %key.product_id,
            country = %key.country,
            reviews = batch.reviews.len(),
            "endpoint replay acquisition finished"
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_state_blob() {
        let html = r#"<span id="cr-state-object" data-state="{&quot;asin&quot;:&quot;B000000001&quot;,&quot;reviewsAjaxUrl&quot;:&quot;/hz/reviews-render/ajax/reviews/get/&quot;,&quot;reviewsCsrfToken&quot;:&quot;tok123&quot;}"></span>"#;
        let state = extract_replay_state(html).unwrap();
        assert_eq!(state.ajax_url, "/hz/reviews-render/ajax/reviews/get/");
        assert_eq!(state.csrf_token, "tok123");
    }

    #[test]
    fn missing_token_yields_none() {
        let html = r#"<span id="cr-state-object" data-state="{&quot;reviewsAjaxUrl&quot;:&quot;/x&quot;}"></span>"#;
        assert!(extract_replay_state(html).is_none());
        assert!(extract_replay_state("<html></html>").is_none());
    }

    #[test]
    fn joins_append_fragments_only() {
        let body = concat!(
            r#"["script", "if(window.ue) { ues('t0','reviewsAjax2',new Date());}"]"#,
            "\n&&&\n",
            r##"["append", "#cm_cr-review_list", "<div id=\"R1\" data-hook=\"review\">a</div>"]"##,
            "\n&&&\n",
            r##"["append", "#cm_cr-review_list", "<div id=\"R2\" data-hook=\"review\">b</div>"]"##,
            "\n&&&\n",
            "not json"
        );
        let html = extract_ajax_fragments(body);
        assert!(html.contains("R1"));
        assert!(html.contains("R2"));
        assert!(!html.contains("window.ue"));
    }
}
