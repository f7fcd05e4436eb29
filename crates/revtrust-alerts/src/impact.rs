//! Business-impact classification of the services that report failures.

use std::collections::HashMap;

use serde::Serialize;

use revtrust_core::SourceVariant;

pub const LLM_SERVICE: &str = "llm_analysis";
pub const ENRICHMENT_SERVICE: &str = "product_enrichment";
pub const WORKER_SERVICE: &str = "analysis_worker";

/// How aggressively a failing service escalates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTier {
    /// On the path of every analysis.
    Primary,
    /// Supporting infrastructure; alerts drop one severity step.
    Core,
    /// Only used when something else already failed; alerts drop two steps.
    Fallback,
}

impl ServiceTier {
    #[must_use]
    pub fn downgrade_steps(self) -> u8 {
        match self {
            ServiceTier::Primary => 0,
            ServiceTier::Core => 1,
            ServiceTier::Fallback => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceImpact {
    pub tier: ServiceTier,
    pub revenue_impacting: bool,
    pub user_facing: bool,
    pub description: String,
}

/// Service name to impact lookup. Unknown services are treated as `Core`.
#[derive(Debug, Clone)]
pub struct ImpactCatalogue {
    services: HashMap<String, ServiceImpact>,
}

impl ImpactCatalogue {
    /// Catalogue for a deployment whose primary review source is `primary`.
    ///
    /// The primary source and the LLM are `Primary`; the other sources and
    /// metadata enrichment are `Fallback`.
    #[must_use]
    pub fn new(primary: SourceVariant) -> Self {
        let mut services = HashMap::new();
        for variant in SourceVariant::ALL {
            let impact = if variant == primary {
                ServiceImpact {
                    tier: ServiceTier::Primary,
                    revenue_impacting: true,
                    user_facing: true,
                    description: format!("primary review source ({variant})"),
                }
            } else {
                ServiceImpact {
                    tier: ServiceTier::Fallback,
                    revenue_impacting: variant == SourceVariant::ThirdPartyApi,
                    user_facing: false,
                    description: format!("fallback review source ({variant})"),
                }
            };
            services.insert(variant.as_str().to_string(), impact);
        }
        services.insert(
            LLM_SERVICE.to_string(),
            ServiceImpact {
                tier: ServiceTier::Primary,
                revenue_impacting: true,
                user_facing: true,
                description: "review authenticity scoring".to_string(),
            },
        );
        services.insert(
            WORKER_SERVICE.to_string(),
            ServiceImpact {
                tier: ServiceTier::Core,
                revenue_impacting: false,
                user_facing: true,
                description: "background analysis queue".to_string(),
            },
        );
        services.insert(
            ENRICHMENT_SERVICE.to_string(),
            ServiceImpact {
                tier: ServiceTier::Fallback,
                revenue_impacting: false,
                user_facing: true,
                description: "product title and image enrichment".to_string(),
            },
        );
        Self { services }
    }

    /// Overrides the tier of `service`, adding it if unknown.
    #[must_use]
    pub fn with_tier(mut self, service: &str, tier: ServiceTier) -> Self {
        self.services
            .entry(service.to_string())
            .and_modify(|impact| impact.tier = tier)
            .or_insert_with(|| ServiceImpact {
                tier,
                revenue_impacting: false,
                user_facing: false,
                description: service.to_string(),
            });
        self
    }

    #[must_use]
    pub fn impact(&self, service: &str) -> ServiceImpact {
        self.services
            .get(service)
            .cloned()
            .unwrap_or_else(|| ServiceImpact {
                tier: ServiceTier::Core,
                revenue_impacting: false,
                user_facing: false,
                description: format!("unclassified service {service}"),
            })
    }
}
