use serde::{Deserialize, Deserializer, Serialize};

/// what the api hands back to clients. Field names follow the public json shape, the catalog's own
/// responses are captured by the `Pahe*` types further down and mapped over.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimeResult {
    pub id: i64,
    pub title: String,
    #[serde(rename = "url")]
    pub canonical_url: String,
    pub year: Option<i64>,
    #[serde(rename = "poster")]
    pub poster_url: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub session: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub number: u32,
    pub title: String,
    #[serde(rename = "snapshot")]
    pub thumbnail_url: Option<String>,
    pub session: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "url")]
    pub stream_url: String,
    pub quality: Option<String>,
    #[serde(rename = "fansub")]
    pub fansub_group: Option<String>,
    #[serde(rename = "audio")]
    pub audio_language: Option<String>,
}

impl Source {
    /// numeric part of "1080p", anything unparseable ranks as 0
    pub fn quality_rank(&self) -> u32 {
        self.quality
            .as_deref()
            .and_then(|q| q.trim().strip_suffix('p'))
            .and_then(|n| n.trim().parse().ok())
            .unwrap_or(0)
    }
}

// /api?m=search
#[derive(Debug, Clone, Deserialize)]
pub struct PaheSearchResponse {
    // zero matches comes back without a data field at all
    #[serde(default)]
    pub data: Vec<PaheSearchItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaheSearchItem {
    pub id: i64,
    pub title: String,
    pub year: Option<i64>,
    pub poster: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub session: String,
}

// /api?m=release
#[derive(Debug, Clone, Deserialize)]
pub struct PaheReleasePage {
    #[serde(default)]
    pub data: Vec<PaheReleaseItem>,
    #[serde(default = "first_page")]
    pub last_page: u32,
}

fn first_page() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaheReleaseItem {
    pub id: i64,
    #[serde(deserialize_with = "episode_number")]
    pub episode: u32,
    pub title: Option<String>,
    pub snapshot: Option<String>,
    pub session: String,
}

impl From<PaheReleaseItem> for Episode {
    fn from(item: PaheReleaseItem) -> Self {
        let title = item
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("Episode {}", item.episode));

        Self {
            id: item.id,
            number: item.episode,
            title,
            thumbnail_url: item.snapshot,
            session: item.session,
        }
    }
}

/// the release api is loose with types, episode shows up as 12, 12.0 or "12"
fn episode_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = serde_json::Value::deserialize(deserializer)?;
    let number = match &value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(n) if n >= 0.0 && n <= u32::MAX as f64 => Ok(n.trunc() as u32),
        _ => Err(D::Error::custom(format!("invalid episode number: {}", value))),
    }
}
