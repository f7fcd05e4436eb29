//! Direct-HTML variant: product page plus paginated review listing pages.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use revtrust_core::{ProductKey, ProductMetadata, ReviewBatch, SourceVariant};

use crate::error::ScraperError;
use crate::http::{marketplace_origin, EgressSession, PageRequest};
use crate::parse::{parse_listing_metadata, parse_review_page, parse_total_count};
use crate::retry::polite_delay;

use super::{ensure_not_silently_empty, SourceAdapter};

pub struct DirectHtmlAdapter {
    session: Arc<EgressSession>,
}

impl DirectHtmlAdapter {
    #[must_use]
    pub fn new(session: Arc<EgressSession>) -> Self {
        Self { session }
    }

    pub(crate) fn product_url(origin: &str, product_id: &str) -> String {
        format!("{origin}/dp/{product_id}")
    }

    pub(crate) fn reviews_url(origin: &str, product_id: &str, page: u32) -> String {
        format!(
            "{origin}/product-reviews/{product_id}/?reviewerType=all_reviews&sortBy=recent&pageNumber={page}"
        )
    }

    /// Product page metadata and review total. Block and not-found errors
    /// propagate; anything else degrades to empty metadata.
    async fn fetch_product_page(
        &self,
        origin: &str,
        key: &ProductKey,
    ) -> Result<(ProductMetadata, Option<u32>), ScraperError> {
        let url = Self::product_url(origin, &key.product_id);
        match self.session.fetch(&PageRequest::get(url)).await {
            Ok(fetched) => Ok((
                parse_listing_metadata(&fetched.body),
                parse_total_count(&fetched.body),
            )),
            Err(
                err @ (ScraperError::HardBlock { .. } | ScraperError::NotFound { .. }),
            ) => Err(err),
            Err(err) => {
                tracing::warn!(
                    product_id = %key.product_id,
                    country = %key.country,
                    error = %err,
                    "product page unavailable, continuing with listing pages"
                );
                Ok((ProductMetadata::default(), None))
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for DirectHtmlAdapter {
    fn variant(&self) -> SourceVariant {
        SourceVariant::DirectHtml
    }

    async fn fetch_reviews(&self, key: &ProductKey) -> Result<ReviewBatch, ScraperError> {
        let settings = &self.session.settings;
        let origin = marketplace_origin(settings, &key.country)?;

        let (metadata, product_total) = self.fetch_product_page(&origin, key).await?;
        let mut batch = ReviewBatch {
            reviews: Vec::new(),
            metadata,
            total_count: product_total,
        };
        let mut seen: HashSet<String> = HashSet::new();
        let mut referer = Self::product_url(&origin, &key.product_id);

        for page in 1..=settings.max_pages.max(1) {
            polite_delay(settings.page_delay_min_ms, settings.page_delay_max_ms).await;

            let url = Self::reviews_url(&origin, &key.product_id, page);
            let request = PageRequest {
                referer: Some(referer.clone()),
                ..PageRequest::get(url.clone())
            };
            let fetched = self.session.fetch(&request).await?;
            let parsed = parse_review_page(&fetched.body);

            if page == 1 {
                batch.metadata.merge_missing(parsed.metadata);
                if batch.total_count.is_none() {
                    batch.total_count = parsed.total_count;
                }
            }

            let fresh: Vec<_> = parsed
                .reviews
                .into_iter()
                .filter(|r| seen.insert(r.id.clone()))
                .collect();
            tracing::debug!(
                product_id = %key.product_id,
                country = %key.country,
                page,
                parsed = fresh.len(),
                route = %fetched.route,
                "review listing page fetched"
            );
            if fresh.is_empty() {
                break;
            }

            let remaining = settings.max_reviews.saturating_sub(batch.reviews.len());
            batch.reviews.extend(fresh.into_iter().take(remaining));
            if batch.reviews.len() >= settings.max_reviews {
                break;
            }
            referer = url;
        }

        ensure_not_silently_empty(self.variant(), &batch)?;
        tracing::info!(
            product_id = %key.product_id,
            country = %key.country,
            reviews = batch.reviews.len(),
            total = ?batch.total_count,
            "direct html acquisition finished"
        );
        Ok(batch)
    }
}
