use pahe_relay::server::{error::Error, utils::source_utils::extract_sources};

const PLAY_PAGE: &str = r#"
<html><body>
<div id="resolutionMenu">
  <button data-src="https://kwik.si/e/Ab720" data-fansub="SubsPlease" data-resolution="720" data-audio="jpn">SubsPlease · 720p</button>
  <button data-src="https://kwik.si/e/Ab1080" data-fansub="SubsPlease" data-resolution="1080" data-audio="jpn">SubsPlease · 1080p</button>
  <button data-src="https://mirror.example/e/Xx1080" data-fansub="Other" data-resolution="1080" data-audio="jpn">Mirror · 1080p</button>
  <button data-src="https://kwik.si/e/Ab720" data-fansub="SubsPlease" data-resolution="720" data-audio="jpn">SubsPlease · 720p</button>
  <button data-src="https://kwik.si/e/En360" data-fansub="Dubs" data-resolution="360" data-audio="eng">Dubs · 360p</button>
</div>
</body></html>
"#;

#[test]
fn test_sources_ranked_by_quality() {
    let sources = extract_sources(PLAY_PAGE).unwrap();

    let urls: Vec<&str> = sources.iter().map(|s| s.stream_url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://kwik.si/e/Ab1080",
            "https://kwik.si/e/Ab720",
            "https://kwik.si/e/En360",
        ]
    );

    assert_eq!(sources[0].quality.as_deref(), Some("1080p"));
    assert_eq!(sources[0].fansub_group.as_deref(), Some("SubsPlease"));
    assert_eq!(sources[2].audio_language.as_deref(), Some("eng"));
}

#[test]
fn test_sources_unique_and_non_increasing() {
    let sources = extract_sources(PLAY_PAGE).unwrap();

    for (i, a) in sources.iter().enumerate() {
        for b in sources.iter().skip(i + 1) {
            assert_ne!(a.stream_url, b.stream_url);
        }
    }
    assert!(
        sources
            .windows(2)
            .all(|pair| pair[0].quality_rank() >= pair[1].quality_rank())
    );
}

#[test]
fn test_non_stream_hosts_skipped() {
    let sources = extract_sources(PLAY_PAGE).unwrap();

    assert!(sources.iter().all(|s| s.stream_url.starts_with("https://kwik.")));
}

#[test]
fn test_bare_links_when_no_buttons() {
    let html = r#"<p>mirror: <a href="https://kwik.cx/e/Zq81nB">watch</a> or https://kwik.cx/e/Zq81nB</p>"#;

    let sources = extract_sources(html).unwrap();

    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].stream_url, "https://kwik.cx/e/Zq81nB");
    assert_eq!(sources[0].quality, None);
}

#[test]
fn test_no_sources_is_not_found() {
    let result = extract_sources("<html><body><p>episode removed</p></body></html>");

    assert!(matches!(result, Err(Error::NotFound(_))));
}
