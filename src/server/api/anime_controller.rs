// thin routes over the catalog and resolver services, all the work happens in there
use axum::{Extension, Json, Router, routing::get};
use serde_json::{Value, json};
use tracing::error;

use crate::{
    catalog::{AnimeResult, Episode, Source},
    server::{
        dtos::query_dto::{EpisodesQuery, ResolveQuery, ResolveResponse, SearchQuery, SourcesQuery},
        error::AppResult,
        extractors::ValidatedQuery,
        services::app_services::AppServices,
    },
};

pub struct AnimeController;

impl AnimeController {
    pub fn app() -> Router {
        Router::new()
            .route("/", get(Self::index))
            .route("/search", get(Self::search))
            .route("/episodes", get(Self::episodes))
            .route("/sources", get(Self::sources))
            .route("/m3u8", get(Self::resolve))
    }

    async fn index(Extension(services): Extension<AppServices>) -> Json<Value> {
        let relay = &services.config.relay_route;
        Json(json!({
            "message": "Welcome to the pahe relay",
            "endpoints": {
                "search": "/search?q=naruto",
                "episodes": "/episodes?session=anime-session-id",
                "sources": "/sources?anime_session=xxx&episode_session=yyy",
                "m3u8": "/m3u8?url=stream-host-url",
                "proxy": format!("{}?url=m3u8-or-segment-url (use this to play videos)", relay),
                "health": "/health"
            },
            "usage": {
                "note": "Stream through the relay to get past CORS and referrer checks",
                "example": format!("Get a manifest from /m3u8, then point your player at {}?url=<m3u8-url>", relay)
            }
        }))
    }

    async fn search(
        Extension(services): Extension<AppServices>,
        ValidatedQuery(params): ValidatedQuery<SearchQuery>,
    ) -> AppResult<Json<Vec<AnimeResult>>> {
        let results = services.catalog.search(&params.q).await.map_err(|e| {
            error!("Search error: {}", e);
            e
        })?;
        Ok(Json(results))
    }

    async fn episodes(
        Extension(services): Extension<AppServices>,
        ValidatedQuery(params): ValidatedQuery<EpisodesQuery>,
    ) -> AppResult<Json<Vec<Episode>>> {
        let episodes = services
            .catalog
            .list_episodes(&params.session)
            .await
            .map_err(|e| {
                error!("Episodes error: {}", e);
                e
            })?;
        Ok(Json(episodes))
    }

    async fn sources(
        Extension(services): Extension<AppServices>,
        ValidatedQuery(params): ValidatedQuery<SourcesQuery>,
    ) -> AppResult<Json<Vec<Source>>> {
        let sources = services
            .catalog
            .get_sources(&params.anime_session, &params.episode_session)
            .await
            .map_err(|e| {
                error!("Sources error: {}", e);
                e
            })?;
        Ok(Json(sources))
    }

    async fn resolve(
        Extension(services): Extension<AppServices>,
        ValidatedQuery(params): ValidatedQuery<ResolveQuery>,
    ) -> AppResult<Json<ResolveResponse>> {
        let m3u8 = services.resolver.resolve(&params.url).await.map_err(|e| {
            error!("M3U8 resolution error: {}", e);
            e
        })?;
        Ok(Json(ResolveResponse { m3u8 }))
    }
}
