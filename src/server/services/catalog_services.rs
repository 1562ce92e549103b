// search, episode listing and play page lookups against the catalog's json api
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::{
    catalog::{AnimeResult, Episode, PaheReleaseItem, PaheReleasePage, PaheSearchResponse, Source},
    config::AppConfig,
    server::{
        error::{AppResult, Error},
        services::fetcher_services::{DynRemoteFetcher, FetchOptions},
        utils::source_utils::extract_sources,
    },
};

pub type DynCatalogService = Arc<dyn CatalogServiceTrait + Send + Sync>;

static OG_URL_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[property="og:url"]"#).expect("Static selector should parse")
});

#[async_trait]
pub trait CatalogServiceTrait {
    async fn search(&self, query: &str) -> AppResult<Vec<AnimeResult>>;
    async fn list_episodes(&self, anime_session: &str) -> AppResult<Vec<Episode>>;
    async fn get_sources(&self, anime_session: &str, episode_session: &str)
    -> AppResult<Vec<Source>>;
}

pub struct CatalogService {
    fetcher: DynRemoteFetcher,
    base_url: String,
    options: FetchOptions,
}

impl CatalogService {
    pub fn new(fetcher: DynRemoteFetcher, config: &AppConfig) -> Self {
        let base_url = config.catalog_base_url.trim_end_matches('/').to_string();
        Self {
            fetcher,
            options: FetchOptions {
                timeout: config.fetch_timeout(),
                referer: Some(format!("{}/", base_url)),
            },
            base_url,
        }
    }

    fn release_url(&self, internal_id: &str, page: u32) -> String {
        format!(
            "{}/api?m=release&id={}&sort=episode_asc&page={}",
            self.base_url, internal_id, page
        )
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> AppResult<T> {
        let body = self.fetcher.fetch_text(url, self.options.clone()).await?;

        serde_json::from_str(&body).map_err(|e| {
            error!("failed to parse json from {}: {}", url, e);
            Error::Upstream(format!("malformed response from {}: {}", url, e))
        })
    }

    async fn fetch_release_page(&self, internal_id: &str, page: u32) -> AppResult<PaheReleasePage> {
        let release_page: PaheReleasePage =
            self.fetch_json(&self.release_url(internal_id, page)).await?;
        debug!(
            "release page {} for {} has {} episodes",
            page,
            internal_id,
            release_page.data.len()
        );
        Ok(release_page)
    }

    /// the landing page only exposes the release id through its og:url, `.../anime/<id>`
    pub fn extract_internal_id(html: &str) -> AppResult<String> {
        let document = Html::parse_document(html);

        document
            .select(&OG_URL_SELECTOR)
            .next()
            .and_then(|meta| meta.value().attr("content"))
            .and_then(|content| content.trim_end_matches('/').rsplit('/').next())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::Parse("Could not find session ID in meta tag".to_string()))
    }

    /// pages in page order, duplicate sessions get logged and dropped, then sorted by number
    pub fn merge_pages(pages: Vec<Vec<PaheReleaseItem>>) -> Vec<Episode> {
        let mut seen = HashSet::new();
        let mut episodes: Vec<Episode> = pages
            .into_iter()
            .flatten()
            .filter(|item| {
                let fresh = seen.insert(item.session.clone());
                if !fresh {
                    warn!(
                        "release pages returned episode {} ({}) twice, pagination is off",
                        item.episode, item.session
                    );
                }
                fresh
            })
            .map(Episode::from)
            .collect();

        episodes.sort_by_key(|episode| (episode.number, episode.id));
        episodes
    }
}

#[async_trait]
impl CatalogServiceTrait for CatalogService {
    async fn search(&self, query: &str) -> AppResult<Vec<AnimeResult>> {
        info!("searching catalog for '{}'", query);

        let url = format!(
            "{}/api?m=search&q={}",
            self.base_url,
            urlencoding::encode(query)
        );

        let response: PaheSearchResponse = self
            .fetch_json(&url)
            .await
            .map_err(|e| e.context("Search failed"))?;

        let results: Vec<AnimeResult> = response
            .data
            .into_iter()
            .map(|anime| AnimeResult {
                id: anime.id,
                canonical_url: format!("{}/anime/{}", self.base_url, anime.session),
                title: anime.title,
                year: anime.year,
                poster_url: anime.poster,
                media_type: anime.kind,
                session: anime.session,
            })
            .collect();

        info!("search for '{}' matched {} entries", query, results.len());
        Ok(results)
    }

    async fn list_episodes(&self, anime_session: &str) -> AppResult<Vec<Episode>> {
        let wrap = |e: Error| e.context("Failed to get episodes");

        let landing_url = format!("{}/anime/{}", self.base_url, anime_session);
        let html = self
            .fetcher
            .fetch_text(&landing_url, self.options.clone())
            .await
            .map_err(wrap)?;

        let internal_id = Self::extract_internal_id(&html).map_err(wrap)?;
        debug!("anime {} has release id {}", anime_session, internal_id);

        let first_page = self
            .fetch_release_page(&internal_id, 1)
            .await
            .map_err(wrap)?;
        let last_page = first_page.last_page.max(1);

        // page counts are small, no need to cap how many go out at once
        let remaining = futures::future::try_join_all(
            (2..=last_page).map(|page| self.fetch_release_page(&internal_id, page)),
        )
        .await
        .map_err(wrap)?;

        let pages: Vec<Vec<PaheReleaseItem>> = std::iter::once(first_page)
            .chain(remaining)
            .map(|page| page.data)
            .collect();

        let episodes = Self::merge_pages(pages);
        info!(
            "listed {} episodes across {} pages for {}",
            episodes.len(),
            last_page,
            anime_session
        );
        Ok(episodes)
    }

    async fn get_sources(
        &self,
        anime_session: &str,
        episode_session: &str,
    ) -> AppResult<Vec<Source>> {
        let wrap = |e: Error| e.context("Failed to get sources");

        let play_url = format!(
            "{}/play/{}/{}",
            self.base_url, anime_session, episode_session
        );
        let html = self
            .fetcher
            .fetch_text(&play_url, self.options.clone())
            .await
            .map_err(wrap)?;

        extract_sources(&html).map_err(wrap)
    }
}
