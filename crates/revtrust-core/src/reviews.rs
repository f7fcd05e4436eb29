use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one analysis: a marketplace product in one country.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductKey {
    pub product_id: String,
    pub country: String,
}

impl ProductKey {
    #[must_use]
    pub fn new(product_id: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            country: country.into(),
        }
    }
}

impl std::fmt::Display for ProductKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.country, self.product_id)
    }
}

/// A single review, normalized from whichever source adapter produced it.
///
/// Only `rating` and `body` are needed for scoring; the rest depends on what
/// the adapter could see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// Adapter-local id (e.g. `R1ABCXYZ`) or a generated UUID.
    pub id: String,
    pub rating: Option<u8>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub verified_purchase: bool,
    /// Review written under an incentivized program (free product in exchange for a review).
    #[serde(default)]
    pub incentivized: bool,
    #[serde(default)]
    pub posted_date: Option<NaiveDate>,
    #[serde(default)]
    pub helpful_count: Option<u32>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub videos: Vec<String>,
}

impl ReviewRecord {
    /// Minimal record with a generated id.
    #[must_use]
    pub fn new(rating: Option<u8>, body: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rating,
            title: None,
            body,
            author: None,
            verified_purchase: false,
            incentivized: false,
            posted_date: None,
            helpful_count: None,
            images: Vec::new(),
            videos: Vec::new(),
        }
    }

    /// `true` when the record carries a 1–5 rating and non-blank body text.
    #[must_use]
    pub fn is_scorable(&self) -> bool {
        self.rating.is_some_and(|r| (1..=5).contains(&r))
            && self.body.as_deref().is_some_and(|b| !b.trim().is_empty())
    }

    /// Body text, or an empty string when absent.
    #[must_use]
    pub fn body_text(&self) -> &str {
        self.body.as_deref().unwrap_or_default()
    }
}

/// Product-level data that travels alongside a review batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

impl ProductMetadata {
    /// Title and image are what the presentation layer needs; anything less
    /// triggers enrichment.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
            && self.image_url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }

    /// Fills empty fields from `other`, keeping existing values.
    pub fn merge_missing(&mut self, other: ProductMetadata) {
        if self.title.is_none() {
            self.title = other.title;
        }
        if self.description.is_none() {
            self.description = other.description;
        }
        if self.image_url.is_none() {
            self.image_url = other.image_url;
        }
    }
}

/// Output of one successful `fetch_reviews` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewBatch {
    pub reviews: Vec<ReviewRecord>,
    pub metadata: ProductMetadata,
    /// Marketplace-reported review count, which usually exceeds `reviews.len()`.
    pub total_count: Option<u32>,
}

impl ReviewBatch {
    /// Number of reviews that can be scored.
    #[must_use]
    pub fn scorable_count(&self) -> usize {
        self.reviews.iter().filter(|r| r.is_scorable()).count()
    }
}
