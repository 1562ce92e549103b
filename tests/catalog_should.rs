use std::sync::Arc;

use pahe_relay::{
    AppConfig,
    catalog::PaheReleasePage,
    server::{
        error::{AppResult, Error},
        services::{
            catalog_services::{CatalogService, CatalogServiceTrait},
            fetcher_services::MockRemoteFetcherTrait,
        },
    },
};

const SEARCH_JSON: &str = r#"{
  "total": 1, "per_page": 8, "current_page": 1, "last_page": 1,
  "data": [{
    "id": 4, "title": "One Piece", "type": "TV", "episodes": 0, "status": "Currently Airing",
    "season": "Fall", "year": 1999, "score": 8.7,
    "poster": "https://i.animepahe.si/posters/op.jpg", "session": "op-session"
  }]
}"#;

fn landing_page(internal_id: &str) -> String {
    format!(
        r#"<html><head><meta property="og:url" content="https://animepahe.si/anime/{}"></head><body></body></html>"#,
        internal_id
    )
}

fn release_page(last_page: u32, items: &[(i64, &str, &str)]) -> String {
    let data: Vec<String> = items
        .iter()
        .map(|(id, episode, session)| {
            format!(
                r#"{{"id": {}, "anime_id": 1, "episode": {}, "title": "", "snapshot": "https://i.animepahe.si/snapshots/{}.jpg", "session": "{}"}}"#,
                id, episode, session, session
            )
        })
        .collect();
    format!(
        r#"{{"total": 0, "per_page": 30, "current_page": 1, "last_page": {}, "data": [{}]}}"#,
        last_page,
        data.join(",")
    )
}

/// canned catalog: landing pages and release pages keyed by url
fn catalog_serving(route: fn(&str) -> AppResult<String>) -> CatalogService {
    let mut fetcher = MockRemoteFetcherTrait::new();
    fetcher
        .expect_fetch_text()
        .returning(move |url, _| route(url));
    CatalogService::new(Arc::new(fetcher), &AppConfig::default())
}

fn paged_catalog(url: &str) -> AppResult<String> {
    if url.ends_with("/anime/show-a") {
        return Ok(landing_page("1001"));
    }
    if url.ends_with("/anime/show-b") {
        return Ok(landing_page("2002"));
    }
    if url.contains("id=1001") && url.ends_with("page=1") {
        return Ok(release_page(3, &[(13, "3", "a-ep3"), (11, "1", "a-ep1")]));
    }
    if url.contains("id=1001") && url.ends_with("page=2") {
        // same session again, the api slipped while paging
        return Ok(release_page(3, &[(12, "2.0", "a-ep2"), (11, "1", "a-ep1")]));
    }
    if url.contains("id=1001") && url.ends_with("page=3") {
        return Ok(release_page(3, &[(14, "\"4\"", "a-ep4"), (15, "5", "a-ep5")]));
    }
    if url.contains("id=2002") && url.ends_with("page=1") {
        return Ok(release_page(1, &[(22, "2", "b-ep2"), (21, "1", "b-ep1")]));
    }
    Err(Error::Upstream(format!("{} returned 404 Not Found", url)))
}

#[tokio::test]
async fn test_search_maps_results() {
    let mut fetcher = MockRemoteFetcherTrait::new();
    fetcher
        .expect_fetch_text()
        .times(1)
        .withf(|url, _| url.contains("/api?m=search&q=one%20piece"))
        .returning(|_, _| Ok(SEARCH_JSON.to_string()));
    let catalog = CatalogService::new(Arc::new(fetcher), &AppConfig::default());

    let results = catalog.search("one piece").await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, 4);
    assert_eq!(results[0].title, "One Piece");
    assert_eq!(results[0].year, Some(1999));
    assert_eq!(results[0].media_type.as_deref(), Some("TV"));
    assert_eq!(results[0].canonical_url, "https://animepahe.si/anime/op-session");
}

#[tokio::test]
async fn test_search_without_matches_is_empty() {
    let catalog = catalog_serving(|_| Ok(r#"{"total": 0}"#.to_string()));

    let results = catalog.search("zzzz").await.unwrap();

    assert!(results.is_empty());
}

#[tokio::test]
async fn test_malformed_search_is_upstream_error() {
    let catalog = catalog_serving(|_| Ok("<html>maintenance</html>".to_string()));

    let result = catalog.search("naruto").await;

    match result {
        Err(error @ Error::Upstream(_)) => {
            assert!(error.to_string().starts_with("Search failed: "));
        }
        other => panic!("expected an upstream error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_episodes_merged_across_pages() {
    let catalog = catalog_serving(paged_catalog);

    let episodes = catalog.list_episodes("show-a").await.unwrap();

    // six items over three pages, one of them twice
    assert_eq!(episodes.len(), 5);
    let numbers: Vec<u32> = episodes.iter().map(|e| e.number).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    assert!(episodes.windows(2).all(|pair| pair[0].number < pair[1].number));

    assert_eq!(episodes[0].session, "a-ep1");
    assert_eq!(episodes[0].title, "Episode 1");
    assert_eq!(
        episodes[3].thumbnail_url.as_deref(),
        Some("https://i.animepahe.si/snapshots/a-ep4.jpg")
    );
}

#[tokio::test]
async fn test_failed_page_fails_listing() {
    fn flaky(url: &str) -> AppResult<String> {
        if url.contains("page=2") {
            return Err(Error::Upstream(format!("{} returned 500", url)));
        }
        paged_catalog(url)
    }
    let catalog = catalog_serving(flaky);

    let result = catalog.list_episodes("show-a").await;

    match result {
        Err(error @ Error::Upstream(_)) => {
            assert!(error.to_string().starts_with("Failed to get episodes: "));
        }
        other => panic!("expected an upstream error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_meta_tag_is_parse_error() {
    let catalog = catalog_serving(|_| Ok("<html><head></head></html>".to_string()));

    let result = catalog.list_episodes("show-a").await;

    match result {
        Err(error @ Error::Parse(_)) => {
            assert_eq!(
                error.to_string(),
                "Failed to get episodes: Could not find session ID in meta tag"
            );
        }
        other => panic!("expected a parse error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_listings_stay_separate() {
    let catalog = catalog_serving(paged_catalog);

    let (a, b) = tokio::join!(
        catalog.list_episodes("show-a"),
        catalog.list_episodes("show-b")
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.len(), 5);
    assert_eq!(b.len(), 2);
    assert!(a.iter().all(|e| e.session.starts_with("a-")));
    assert!(b.iter().all(|e| e.session.starts_with("b-")));
}

#[tokio::test]
async fn test_sources_from_play_page() {
    fn play_page(url: &str) -> AppResult<String> {
        assert!(url.ends_with("/play/show-a/a-ep1"));
        Ok(r#"<button data-src="https://kwik.si/e/Lo" data-fansub="G" data-resolution="360" data-audio="jpn"></button>
<button data-src="https://kwik.si/e/Hi" data-fansub="G" data-resolution="1080" data-audio="jpn"></button>"#
            .to_string())
    }
    let catalog = catalog_serving(play_page);

    let sources = catalog.get_sources("show-a", "a-ep1").await.unwrap();

    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].stream_url, "https://kwik.si/e/Hi");
}

#[tokio::test]
async fn test_empty_play_page_is_not_found() {
    let catalog = catalog_serving(|_| Ok("<html></html>".to_string()));

    let result = catalog.get_sources("show-a", "a-ep1").await;

    match result {
        Err(error @ Error::NotFound(_)) => {
            assert!(error.to_string().starts_with("Failed to get sources: "));
        }
        other => panic!("expected not found, got {:?}", other),
    }
}

#[test]
fn test_internal_id_from_og_url() {
    let html = landing_page("5521");

    assert_eq!(CatalogService::extract_internal_id(&html).unwrap(), "5521");
}

#[test]
fn test_release_page_defaults() {
    let page: PaheReleasePage = serde_json::from_str(r#"{"total": 0}"#).unwrap();

    assert!(page.data.is_empty());
    assert_eq!(page.last_page, 1);
}
