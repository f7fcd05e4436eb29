//! Fills metadata gaps left by adapters whose source carries no listing data.

use std::sync::Arc;

use revtrust_core::{ProductKey, ProductMetadata};
use revtrust_db::AnalysisStore;

use crate::error::ScraperError;
use crate::http::{marketplace_origin, EgressSession, PageRequest};
use crate::parse::parse_listing_metadata;

pub struct ProductPageEnricher {
    session: Arc<EgressSession>,
}

impl ProductPageEnricher {
    #[must_use]
    pub fn new(session: Arc<EgressSession>) -> Self {
        Self { session }
    }

    /// Fetches the product page and extracts title, description and image.
    ///
    /// # Errors
    ///
    /// Any fetch error from [`EgressSession::fetch`].
    pub async fn fetch_metadata(&self, key: &ProductKey) -> Result<ProductMetadata, ScraperError> {
        let origin = marketplace_origin(&self.session.settings, &key.country)?;
        let url = format!("{origin}/dp/{}", key.product_id);
        let fetched = self.session.fetch(&PageRequest::get(url)).await?;
        Ok(parse_listing_metadata(&fetched.body))
    }

    /// Fetches metadata and writes whatever the record is still missing.
    /// A page with no metadata at all is not an error.
    ///
    /// # Errors
    ///
    /// Any error from [`fetch_metadata`](Self::fetch_metadata), or
    /// [`ScraperError::Store`] when the write is rejected.
    pub async fn enrich(&self, key: &ProductKey, store: &dyn AnalysisStore) -> Result<(), ScraperError> {
        let metadata = self.fetch_metadata(key).await?;
        if metadata == ProductMetadata::default() {
            tracing::debug!(product_id = %key.product_id, "product page carried no metadata");
            return Ok(());
        }
        store.update_metadata(key, &metadata).await?;
        tracing::debug!(product_id = %key.product_id, "metadata enriched");
        Ok(())
    }
}
