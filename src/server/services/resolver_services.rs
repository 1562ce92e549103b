// stream host page -> manifest url. Direct urls in the markup win, otherwise the packed player
// script is picked out, defanged and run through the sandbox
use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    config::AppConfig,
    server::{
        error::{AppResult, Error},
        services::{
            fetcher_services::{DynRemoteFetcher, FetchOptions},
            sandbox_services::DynScriptSandbox,
        },
        utils::{
            m3u8_utils::find_manifest_url,
            script_utils::{
                ScriptCandidate, extract_script_blocks, find_data_src_manifest, prepare_script,
                select_script_candidate,
            },
        },
    },
};

pub type DynScriptResolver = Arc<dyn ScriptResolverTrait + Send + Sync>;

#[automock]
#[async_trait]
pub trait ScriptResolverTrait {
    async fn resolve(&self, stream_host_url: &str) -> AppResult<String>;
}

/// what the page scan found before anything had to be executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageScan {
    Resolved(String),
    Script(String),
}

pub struct ScriptResolver {
    fetcher: DynRemoteFetcher,
    sandbox: DynScriptSandbox,
    options: FetchOptions,
}

impl ScriptResolver {
    pub fn new(fetcher: DynRemoteFetcher, sandbox: DynScriptSandbox, config: &AppConfig) -> Self {
        Self {
            fetcher,
            sandbox,
            options: FetchOptions {
                timeout: config.resolve_timeout(),
                referer: Some(format!(
                    "{}/",
                    config.catalog_base_url.trim_end_matches('/')
                )),
            },
        }
    }

    /// everything short of running the script. Direct url, then a script candidate, then a
    /// data-src attribute (resolved against the page), then give up
    pub fn scan_page(html: &str, page_url: &Url) -> AppResult<PageScan> {
        if let Some(direct) = find_manifest_url(html) {
            debug!("found manifest url directly in page");
            return Ok(PageScan::Resolved(direct));
        }

        let scripts = extract_script_blocks(html);
        debug!("page has {} inline scripts", scripts.len());

        if let Some(candidate) = select_script_candidate(&scripts) {
            if let ScriptCandidate::LongestEval(_) = candidate {
                warn!("no eval script with a relevance signal, using the longest eval block");
            }
            return Ok(PageScan::Script(scripts[candidate.index()].to_string()));
        }

        let data_src = find_data_src_manifest(html).ok_or_else(|| {
            Error::NotFound("No candidate <script> block found to evaluate".to_string())
        })?;

        page_url
            .join(&data_src)
            .map(|resolved| PageScan::Resolved(resolved.to_string()))
            .map_err(|e| {
                error!("Failed to resolve data-src {} against {}: {}", data_src, page_url, e);
                Error::Parse(format!("Invalid data-src manifest reference: {}", data_src))
            })
    }
}

#[async_trait]
impl ScriptResolverTrait for ScriptResolver {
    async fn resolve(&self, stream_host_url: &str) -> AppResult<String> {
        let wrap = |e: Error| e.context("Failed to resolve stream host");
        info!("resolving stream host {}", stream_host_url);

        let page_url = Url::parse(stream_host_url).map_err(|e| {
            error!("Failed to parse stream host url {}: {}", stream_host_url, e);
            Error::BadRequest(format!("Invalid URL: {}", e))
        })?;

        let html = self
            .fetcher
            .fetch_text(stream_host_url, self.options.clone())
            .await
            .map_err(wrap)?;

        let script = match Self::scan_page(&html, &page_url).map_err(wrap)? {
            PageScan::Resolved(manifest_url) => {
                info!("resolved {} without the sandbox", stream_host_url);
                return Ok(manifest_url);
            }
            PageScan::Script(script) => script,
        };

        let output = self
            .sandbox
            .execute(&prepare_script(&script))
            .await
            .map_err(wrap)?;

        match find_manifest_url(&output) {
            Some(manifest_url) => {
                info!("resolved {} through the sandbox", stream_host_url);
                Ok(manifest_url)
            }
            None => Err(wrap(Error::resolution("Could not resolve .m3u8", &output))),
        }
    }
}
