use std::sync::Arc;

use tracing::info;

use crate::{
    config::AppConfig,
    server::error::AppResult,
};

use super::{
    catalog_services::{CatalogService, DynCatalogService},
    fetcher_services::{DynRemoteFetcher, HttpFetcher},
    relay_services::{DynRelayService, RelayService},
    resolver_services::{DynScriptResolver, ScriptResolver},
    sandbox_services::{DynScriptSandbox, NodeSandbox},
};

/// every service the routes need, nothing in here holds per-request state
#[derive(Clone)]
pub struct AppServices {
    pub fetcher: DynRemoteFetcher,
    pub catalog: DynCatalogService,
    pub sandbox: DynScriptSandbox,
    pub resolver: DynScriptResolver,
    pub relay: DynRelayService,
    pub config: Arc<AppConfig>,
}

impl AppServices {
    pub fn new(config: Arc<AppConfig>) -> AppResult<Self> {
        info!("starting services...");

        // one client for every upstream call, its pool needs no coordination
        let fetcher = Arc::new(HttpFetcher::new(&config)?) as DynRemoteFetcher;
        let sandbox = Arc::new(NodeSandbox::new(&config)) as DynScriptSandbox;

        Ok(Self::with_parts(fetcher, sandbox, config))
    }

    /// wire the pipeline on top of a given fetcher and sandbox, tests swap both for mocks
    pub fn with_parts(
        fetcher: DynRemoteFetcher,
        sandbox: DynScriptSandbox,
        config: Arc<AppConfig>,
    ) -> Self {
        let catalog = Arc::new(CatalogService::new(fetcher.clone(), &config)) as DynCatalogService;
        let resolver = Arc::new(ScriptResolver::new(fetcher.clone(), sandbox.clone(), &config))
            as DynScriptResolver;
        let relay = Arc::new(RelayService::new(fetcher.clone(), &config)) as DynRelayService;

        info!("catalog, resolver and relay services ok");

        Self {
            fetcher,
            catalog,
            sandbox,
            resolver,
            relay,
            config,
        }
    }
}
