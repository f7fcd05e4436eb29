use async_trait::async_trait;

use revtrust_core::ProductKey;
use revtrust_db::AnalysisStore;
use revtrust_scraper::{ProductPageEnricher, ScraperError};

/// Fills product metadata the review source left out. Runs detached from
/// the analysis; an error is reported to the alerter and nothing else.
#[async_trait]
pub trait MetadataEnricher: Send + Sync {
    async fn enrich(&self, key: &ProductKey, store: &dyn AnalysisStore)
        -> Result<(), ScraperError>;
}

#[async_trait]
impl MetadataEnricher for ProductPageEnricher {
    async fn enrich(
        &self,
        key: &ProductKey,
        store: &dyn AnalysisStore,
    ) -> Result<(), ScraperError> {
        ProductPageEnricher::enrich(self, key, store).await
    }
}
