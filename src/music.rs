#![forbid(unsafe_code)]

//! Pass-through client for the external music catalog.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use crate::format::format_count;

const CATALOG_PATH: &str = "/api/s/all";

#[derive(Debug, Error)]
pub enum MusicError {
    #[error("music API returned status code {0}")]
    Status(u16),

    #[error("music API request failed: {0}")]
    Transport(String),

    #[error("music API returned an unreadable body: {0}")]
    Decode(#[from] std::io::Error),

    #[error("track {0} not found")]
    NotFound(String),

    #[error("music request task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One catalog entry plus the absolute URLs the player needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MusicTrackDetail {
    pub track: Value,
    pub cover_url: String,
    pub audio_url: String,
    pub plays_formatted: String,
}

#[derive(Clone)]
pub struct MusicClient {
    base_url: String,
    agent: ureq::Agent,
}

impl MusicClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(10))
            .build();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent,
        }
    }

    /// The upstream catalog, unchanged.
    pub async fn catalog(&self) -> Result<Value, MusicError> {
        let client = self.clone();
        tokio::task::spawn_blocking(move || client.fetch_catalog()).await?
    }

    pub async fn track(&self, id: &str) -> Result<MusicTrackDetail, MusicError> {
        let catalog = self.catalog().await?;
        find_track(&catalog, id, &self.base_url).ok_or_else(|| MusicError::NotFound(id.to_string()))
    }

    fn fetch_catalog(&self) -> Result<Value, MusicError> {
        let url = format!("{}{CATALOG_PATH}", self.base_url);
        debug!(url = %url, "fetching music catalog");
        let response = self.agent.get(&url).call().map_err(|err| match err {
            ureq::Error::Status(code, _) => {
                error!(url = %url, status = code, "music catalog request rejected");
                MusicError::Status(code)
            }
            ureq::Error::Transport(transport) => {
                error!(url = %url, error = %transport, "music catalog request failed");
                MusicError::Transport(transport.to_string())
            }
        })?;
        Ok(response.into_json::<Value>()?)
    }
}

/// Looks up `id` in a catalog listing. Ids are compared as text since the
/// upstream has used both numbers and strings.
pub fn find_track(catalog: &Value, id: &str, base_url: &str) -> Option<MusicTrackDetail> {
    let track = catalog.as_array()?.iter().find(|entry| match entry.get("id") {
        Some(Value::String(value)) => value == id,
        Some(Value::Number(value)) => value.to_string() == id,
        _ => false,
    })?;

    let path = |key: &str| track.get(key).and_then(Value::as_str).unwrap_or_default();
    let plays = track.get("plays").and_then(Value::as_u64).unwrap_or(0);

    Some(MusicTrackDetail {
        track: track.clone(),
        cover_url: format!("{base_url}{}", path("imagePath")),
        audio_url: format!("{base_url}{}", path("audioPath")),
        plays_formatted: format_count(plays),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BASE: &str = "https://music.example";

    fn catalog() -> Value {
        json!([
            { "id": "a1", "title": "First", "imagePath": "/img/a1.jpg", "audioPath": "/audio/a1.mp3", "plays": 1500 },
            { "id": 42, "title": "Numeric", "imagePath": "/img/42.jpg", "audioPath": "/audio/42.mp3" },
            { "title": "No id" }
        ])
    }

    #[test]
    fn find_track_builds_absolute_urls() {
        let detail = find_track(&catalog(), "a1", BASE).unwrap();
        assert_eq!(detail.cover_url, "https://music.example/img/a1.jpg");
        assert_eq!(detail.audio_url, "https://music.example/audio/a1.mp3");
        assert_eq!(detail.plays_formatted, "1.5K");
        assert_eq!(detail.track["title"], "First");
    }

    #[test]
    fn find_track_matches_numeric_ids() {
        let detail = find_track(&catalog(), "42", BASE).unwrap();
        assert_eq!(detail.plays_formatted, "0");
    }

    #[test]
    fn find_track_misses_unknown_ids() {
        assert!(find_track(&catalog(), "missing", BASE).is_none());
        assert!(find_track(&json!({ "id": "a1" }), "a1", BASE).is_none());
    }

    #[test]
    fn client_trims_trailing_slash() {
        assert_eq!(MusicClient::new("https://music.example/").base_url, BASE);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_transport_error() {
        let client = MusicClient::new("http://127.0.0.1:9");
        let err = client.catalog().await.unwrap_err();
        assert!(matches!(err, MusicError::Transport(_)));
    }
}
