pub mod adapters;
pub mod block;
pub mod credentials;
pub mod enrich;
pub mod error;
pub mod http;
pub mod parse;
pub(crate) mod retry;
pub mod routes;

pub use adapters::{
    build_adapter, build_adapters, DeferredJob, DirectHtmlAdapter, EndpointReplayAdapter,
    ManagedJobAdapter, PersistOutcome, SourceAdapter, ThirdPartyApiAdapter,
};
pub use credentials::{Credential, CredentialHealth, CredentialPool};
pub use enrich::ProductPageEnricher;
pub use error::ScraperError;
pub use http::{EgressSession, Fetched, PageRequest};
pub use routes::{Route, RouteHealth, RouteSelector};
