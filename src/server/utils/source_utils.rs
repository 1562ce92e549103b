use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::{
    catalog::Source,
    server::error::{AppResult, Error},
};

/// every stream host the play page links to lives under kwik.<tld>
pub const STREAM_HOST_PREFIX: &str = "kwik.";

static SOURCE_BUTTON_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("button[data-src][data-fansub][data-resolution][data-audio]")
        .expect("Static selector should parse")
});

static BARE_STREAM_HOST_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://kwik\.(?:si|cx|link)/e/\w+").expect("stream host regex should compile")
});

fn is_stream_host(src: &str) -> bool {
    url::Url::parse(src)
        .ok()
        .filter(|u| u.scheme() == "https")
        .and_then(|u| u.host_str().map(|h| h.starts_with(STREAM_HOST_PREFIX)))
        .unwrap_or(false)
}

/// the quality picker buttons on the play page, attribute order doesn't matter
fn sources_from_buttons(html: &str) -> Vec<Source> {
    let document = Html::parse_document(html);

    document
        .select(&SOURCE_BUTTON_SELECTOR)
        .filter_map(|button| {
            let attr = |name: &str| button.value().attr(name).map(|v| v.trim().to_string());
            let src = attr("data-src")?;

            if !is_stream_host(&src) {
                debug!("skipping non stream host source: {}", src);
                return None;
            }

            Some(Source {
                stream_url: src,
                quality: attr("data-resolution").map(|r| format!("{}p", r)),
                fansub_group: attr("data-fansub"),
                audio_language: attr("data-audio"),
            })
        })
        .collect()
}

fn sources_from_bare_links(html: &str) -> Vec<Source> {
    BARE_STREAM_HOST_REGEX
        .find_iter(html)
        .map(|link| Source {
            stream_url: link.as_str().to_string(),
            quality: None,
            fansub_group: None,
            audio_language: None,
        })
        .collect()
}

/// ranked, deduplicated stream host links from an episode play page
pub fn extract_sources(html: &str) -> AppResult<Vec<Source>> {
    let mut sources = sources_from_buttons(html);

    if sources.is_empty() {
        warn!("no source buttons on play page, falling back to bare stream host links");
        sources = sources_from_bare_links(html);
    }

    if sources.is_empty() {
        return Err(Error::NotFound(
            "No stream host links found on play page".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    sources.retain(|source| seen.insert(source.stream_url.clone()));

    // stable, so equal qualities keep page order
    sources.sort_by_key(|source| std::cmp::Reverse(source.quality_rank()));

    debug!("extracted {} sources", sources.len());
    Ok(sources)
}
