pub mod app_services;
pub mod catalog_services;
pub mod fetcher_services;
pub mod relay_services;
pub mod resolver_services;
pub mod sandbox_services;

pub use catalog_services::DynCatalogService;
pub use fetcher_services::DynRemoteFetcher;
pub use relay_services::DynRelayService;
pub use resolver_services::DynScriptResolver;
pub use sandbox_services::DynScriptSandbox;
