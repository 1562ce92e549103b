use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct SearchQuery {
    #[validate(length(min = 1, message = "Query parameter \"q\" is required"))]
    pub q: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EpisodesQuery {
    #[validate(length(min = 1, message = "Query parameter \"session\" is required"))]
    pub session: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SourcesQuery {
    #[validate(length(min = 1, message = "Query parameter \"anime_session\" is required"))]
    pub anime_session: String,
    #[validate(length(min = 1, message = "Query parameter \"episode_session\" is required"))]
    pub episode_session: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResolveQuery {
    #[validate(url(message = "Query parameter \"url\" must be an absolute URL"))]
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub m3u8: String,
}
