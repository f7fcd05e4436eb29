//! Third-party-API variant: existence check on the storefront, then a paid
//! reviews API whose schema is translated into [`ReviewRecord`]s.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use revtrust_core::{
    ProductKey, ProductMetadata, ReviewBatch, ReviewRecord, ReviewsApiSettings, ScraperSettings,
    SourceVariant,
};

use crate::error::ScraperError;
use crate::http::marketplace_origin;

use super::managed_job::rating_from_value;
use super::{ensure_not_silently_empty, SourceAdapter};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiResponse {
    product: ApiProduct,
    reviews: Vec<ApiReview>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiProduct {
    title: Option<String>,
    description: Option<String>,
    image: Option<String>,
    total_reviews: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiReview {
    id: Option<String>,
    rating: Option<serde_json::Value>,
    title: Option<String>,
    text: Option<String>,
    author: Option<String>,
    verified_purchase: Option<bool>,
    is_vine: Option<bool>,
    date: Option<String>,
    helpful_votes: Option<u32>,
    images: Vec<String>,
}

impl From<ApiReview> for ReviewRecord {
    fn from(review: ApiReview) -> Self {
        let mut record = ReviewRecord::new(
            review.rating.as_ref().and_then(rating_from_value),
            review.text.filter(|t| !t.trim().is_empty()),
        );
        if let Some(id) = review.id {
            record.id = id;
        }
        record.title = review.title;
        record.author = review.author;
        record.verified_purchase = review.verified_purchase.unwrap_or(false);
        record.incentivized = review.is_vine.unwrap_or(false);
        record.posted_date = review
            .date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d.get(..10).unwrap_or(d), "%Y-%m-%d").ok());
        record.helpful_count = review.helpful_votes;
        record.images = review.images;
        record
    }
}

pub struct ThirdPartyApiAdapter {
    client: reqwest::Client,
    settings: ReviewsApiSettings,
    scraper: ScraperSettings,
}

impl ThirdPartyApiAdapter {
    /// # Errors
    ///
    /// Returns [`ScraperError::Http`] if the HTTP client cannot be built.
    pub fn new(
        settings: ReviewsApiSettings,
        scraper: &ScraperSettings,
    ) -> Result<Self, ScraperError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(scraper.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(&scraper.user_agent)
            .build()?;
        Ok(Self {
            client,
            settings,
            scraper: scraper.clone(),
        })
    }

    /// `HEAD` on the product page. Only a 404 is conclusive; anything else,
    /// including block pages, lets the API call proceed.
    async fn check_exists(&self, key: &ProductKey) -> Result<(), ScraperError> {
        let origin = marketplace_origin(&self.scraper, &key.country)?;
        let url = format!("{origin}/dp/{}", key.product_id);
        match self.client.head(&url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                Err(ScraperError::NotFound { url })
            }
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::debug!(url = %url, error = %err, "existence check inconclusive");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for ThirdPartyApiAdapter {
    fn variant(&self) -> SourceVariant {
        SourceVariant::ThirdPartyApi
    }

    async fn fetch_reviews(&self, key: &ProductKey) -> Result<ReviewBatch, ScraperError> {
        let base = self
            .settings
            .base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .ok_or(ScraperError::NotConfigured {
                variant: SourceVariant::ThirdPartyApi,
                missing: "REVTRUST_REVIEWS_API_URL",
            })?;
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or(ScraperError::NotConfigured {
                variant: SourceVariant::ThirdPartyApi,
                missing: "REVTRUST_REVIEWS_API_KEY",
            })?;

        self.check_exists(key).await?;

        let url = format!("{base}/reviews");
        let limit = self.scraper.max_reviews.to_string();
        let response = self
            .client
            .get(&url)
            .header("x-api-key", api_key)
            .query(&[
                ("asin", key.product_id.as_str()),
                ("country", key.country.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ScraperError::NotFound { url });
        }
        if !status.is_success() {
            return Err(ScraperError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        let parsed: ApiResponse =
            serde_json::from_str(&body).map_err(|source| ScraperError::Deserialize {
                context: format!("reviews API response for {key}"),
                source,
            })?;

        let mut reviews: Vec<ReviewRecord> =
            parsed.reviews.into_iter().map(ReviewRecord::from).collect();
        reviews.truncate(self.scraper.max_reviews);
        let batch = ReviewBatch {
            reviews,
            metadata: ProductMetadata {
                title: parsed.product.title,
                description: parsed.product.description,
                image_url: parsed.product.image,
            },
            total_count: parsed.product.total_reviews,
        };
        ensure_not_silently_empty(self.variant(), &batch)?;
        tracing::info!(
            product_id = %key.product_id,
            country = %key.country,
            reviews = batch.reviews.len(),
            "reviews API acquisition finished"
        );
        Ok(batch)
    }
}
