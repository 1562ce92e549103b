use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error};
use url::Url;

// permissive on purpose: runs until a quote, whitespace, angle bracket or closing paren
static MANIFEST_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^'"\s<>]+\.m3u8[^\s'")<]*"#).expect("manifest regex should compile")
});

pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// first manifest-looking url anywhere in the text
pub fn find_manifest_url(text: &str) -> Option<String> {
    MANIFEST_URL_REGEX
        .find(text)
        .map(|found| found.as_str().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Manifest,
    Segment,
    Binary,
}

impl ContentKind {
    /// upstream content-type wins when it says something, the extension covers the rest. CDNs love
    /// serving playlists as text/plain or octet-stream so a .m3u8 path is always a manifest
    pub fn classify(content_type: Option<&str>, url: &str) -> Self {
        let extension = url_extension(url);

        if let Some(ct) = content_type.map(|ct| ct.to_ascii_lowercase()) {
            if ct.contains("mpegurl") || ct.contains("m3u8") || extension.as_deref() == Some("m3u8")
            {
                return Self::Manifest;
            }
            if ct.starts_with("video/") || ct.starts_with("audio/") {
                return Self::Segment;
            }
            return Self::Binary;
        }

        match extension.as_deref() {
            Some("m3u8") => Self::Manifest,
            Some("ts" | "m4s" | "mp4" | "aac") => Self::Segment,
            _ => Self::Binary,
        }
    }

    pub fn default_content_type(&self) -> &'static str {
        match self {
            Self::Manifest => MANIFEST_CONTENT_TYPE,
            Self::Segment => SEGMENT_CONTENT_TYPE,
            Self::Binary => BINARY_CONTENT_TYPE,
        }
    }
}

fn url_extension(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or("").to_string(),
    };

    let file = path.rsplit('/').next()?;
    file.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// `/proxy?url=<encoded>`, requesting it repeats the relay for the target
pub fn relay_reference(relay_route: &str, target: &str) -> String {
    format!("{}?url={}", relay_route, urlencoding::encode(target))
}

/// rewrite every reference line so the player comes back through the relay. Blank lines and `#`
/// directives are kept byte for byte, so are the line endings
pub fn rewrite_manifest(text: &str, manifest_url: &Url, relay_route: &str) -> String {
    let mut rewritten = 0usize;

    let lines: Vec<String> = text
        .split('\n')
        .map(|line| {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                return line.to_string();
            }

            let full_url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
                trimmed.to_string()
            } else {
                match manifest_url.join(trimmed) {
                    Ok(resolved) => resolved.to_string(),
                    Err(e) => {
                        error!("Failed to resolve: {} - {}", trimmed, e);
                        return line.to_string();
                    }
                }
            };

            rewritten += 1;
            let reference = relay_reference(relay_route, &full_url);
            // keep a crlf playlist crlf
            if line.ends_with('\r') {
                format!("{}\r", reference)
            } else {
                reference
            }
        })
        .collect();

    debug!("rewrote {} references in manifest {}", rewritten, manifest_url);
    lines.join("\n")
}
