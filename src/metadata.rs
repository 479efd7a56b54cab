#![forbid(unsafe_code)]

//! Record shapes served to the frontend and the normalizer that builds them
//! from raw `yt-dlp` JSON.
//!
//! `yt-dlp` output is loosely structured: fields go missing, numbers arrive as
//! floats or strings, and a bulk listing can contain a truncated line. Every
//! read below therefore has an explicit default, and a bad field only ever
//! affects itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::format::{format_count, format_date, format_duration};

pub const UNTITLED_VIDEO: &str = "Untitled Video";
pub const UNKNOWN_CHANNEL: &str = "Unknown Channel";
/// Region tag attached to results produced by an unscoped fallback query.
pub const GLOBAL_REGION: &str = "GLOBAL";

const CHANNEL_UNAVAILABLE: &str = "Channel information is currently unavailable";

/// One entry of a search, trending or channel listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub id: String,
    pub title: String,
    pub channel: String,
    pub channel_id: String,
    pub thumbnail: String,
    pub duration: Option<String>,
    pub view_count: Option<String>,
    #[serde(default)]
    pub raw_view_count: u64,
    #[serde(default)]
    pub published_at: String,
    /// Region the query was scoped to. Channel listings leave it unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// Everything the watch page shows. Serializes flat, as a superset of
/// [`VideoSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDetail {
    #[serde(flatten)]
    pub summary: VideoSummary,
    #[serde(default)]
    pub description: String,
    pub likes: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    pub description: String,
    pub channel_id: String,
    pub subscriber_count: String,
    pub channel_url: String,
}

impl ChannelInfo {
    /// Low-fidelity record used when every lookup failed, so the channel page
    /// can still render.
    pub fn placeholder(channel_id: &str) -> Self {
        let display = channel_id.strip_prefix('@').unwrap_or(channel_id);
        Self {
            name: format!("Channel: {display}"),
            description: CHANNEL_UNAVAILABLE.to_string(),
            channel_id: channel_id.to_string(),
            subscriber_count: "N/A".to_string(),
            channel_url: format!("https://www.youtube.com/{channel_id}"),
        }
    }
}

/// Aggregates shown in the channel header, computed over whatever has been
/// loaded so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub total_views: String,
    pub video_count: usize,
    pub avg_views: String,
}

impl ChannelStats {
    pub fn from_videos(videos: &[VideoSummary]) -> Self {
        let total = videos
            .iter()
            .map(|video| video.raw_view_count)
            .fold(0u64, u64::saturating_add);
        let video_count = videos.len();
        let average = if video_count == 0 {
            0
        } else {
            (total as f64 / video_count as f64).round() as u64
        };
        Self {
            total_views: format_count(total),
            video_count,
            avg_views: format_count(average),
        }
    }
}

/// Canonical still image for a video id. Used whenever the extractor did not
/// report a thumbnail.
pub fn fallback_thumbnail(video_id: &str) -> String {
    format!("https://i.ytimg.com/vi/{video_id}/hqdefault.jpg")
}

/// Parses newline-delimited extractor output into summaries.
///
/// Malformed lines and records without an id are logged and skipped; one bad
/// line never fails the batch.
pub fn parse_listing(output: &str, country: Option<&str>) -> Vec<VideoSummary> {
    let mut videos = Vec::new();
    for (index, line) in output.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(line = index + 1, error = %err, "skipping malformed extractor line");
                continue;
            }
        };
        match normalize_summary(&raw, country) {
            Some(video) => videos.push(video),
            None => debug!(line = index + 1, "skipping extractor entry without an id"),
        }
    }
    videos
}

/// Maps one flat-playlist entry onto a [`VideoSummary`]. Returns `None` when
/// the entry is not an object or carries no id.
pub fn normalize_summary(raw: &Value, country: Option<&str>) -> Option<VideoSummary> {
    if !raw.is_object() {
        return None;
    }
    let id = text(raw, "id").map(str::trim).unwrap_or_default();
    if id.is_empty() {
        return None;
    }

    let raw_view_count = integer(raw, "view_count").unwrap_or(0);
    Some(VideoSummary {
        id: id.to_string(),
        title: text_or(raw, "title", UNTITLED_VIDEO),
        channel: channel_name(raw, &["uploader", "channel"]),
        channel_id: text_or(raw, "channel_id", ""),
        thumbnail: resolve_thumbnail(raw, id),
        duration: integer(raw, "duration")
            .filter(|seconds| *seconds > 0)
            .map(format_duration),
        view_count: (raw_view_count > 0).then(|| format_count(raw_view_count)),
        raw_view_count,
        published_at: text(raw, "upload_date").map(format_date).unwrap_or_default(),
        country: country.map(str::to_string),
    })
}

/// Maps a single `--dump-json` document onto a [`VideoDetail`]. The requested
/// id wins over whatever the document reports.
pub fn normalize_detail(raw: &Value, video_id: &str) -> VideoDetail {
    let duration_seconds = integer(raw, "duration").unwrap_or(0);
    let raw_view_count = integer(raw, "view_count").unwrap_or(0);
    let likes = integer(raw, "like_count").unwrap_or(0);

    VideoDetail {
        summary: VideoSummary {
            id: video_id.to_string(),
            title: text_or(raw, "title", UNTITLED_VIDEO),
            channel: channel_name(raw, &["uploader", "channel"]),
            channel_id: text_or(raw, "channel_id", ""),
            thumbnail: resolve_thumbnail(raw, video_id),
            duration: Some(format_duration(duration_seconds)),
            view_count: Some(format_count(raw_view_count)),
            raw_view_count,
            published_at: text(raw, "upload_date").map(format_date).unwrap_or_default(),
            country: None,
        },
        description: text_or(raw, "description", ""),
        likes: format_count(likes),
        categories: string_list(raw, "categories"),
        duration_seconds,
    }
}

/// Maps a channel dump onto [`ChannelInfo`], filling gaps from what the caller
/// asked for.
pub fn normalize_channel(raw: &Value, channel_id: &str, requested_url: &str) -> ChannelInfo {
    ChannelInfo {
        name: channel_name(raw, &["channel", "uploader"]),
        description: text_or(raw, "description", ""),
        channel_id: text(raw, "channel_id")
            .filter(|value| !value.is_empty())
            .unwrap_or(channel_id)
            .to_string(),
        subscriber_count: subscriber_count(raw),
        channel_url: text(raw, "channel_url")
            .filter(|value| !value.is_empty())
            .unwrap_or(requested_url)
            .to_string(),
    }
}

fn resolve_thumbnail(raw: &Value, video_id: &str) -> String {
    if let Some(url) = text(raw, "thumbnail").filter(|url| !url.is_empty()) {
        return url.to_string();
    }
    // yt-dlp sorts thumbnails from smallest to largest.
    if let Some(thumbnails) = raw.get("thumbnails").and_then(Value::as_array) {
        for entry in thumbnails.iter().rev() {
            if let Some(url) = entry
                .get("url")
                .and_then(Value::as_str)
                .filter(|url| !url.is_empty())
            {
                return url.to_string();
            }
        }
    }
    fallback_thumbnail(video_id)
}

fn channel_name(raw: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| text(raw, key).filter(|value| !value.trim().is_empty()))
        .unwrap_or(UNKNOWN_CHANNEL)
        .to_string()
}

fn subscriber_count(raw: &Value) -> String {
    for key in ["subscriber_count", "channel_follower_count"] {
        if let Some(count) = integer(raw, key) {
            return count.to_string();
        }
        if let Some(value) = text(raw, key).filter(|value| !value.trim().is_empty()) {
            return value.trim().to_string();
        }
    }
    "0".to_string()
}

// Coerce-or-default helpers. Each one looks at a single field and never fails.

fn text<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(Value::as_str)
}

fn text_or(raw: &Value, key: &str, default: &str) -> String {
    text(raw, key)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or(default)
        .to_string()
}

fn integer(raw: &Value, key: &str) -> Option<u64> {
    let value = raw.get(key)?;
    let coerced = match value {
        Value::Null => return None,
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().and_then(non_negative_whole)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<u64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(non_negative_whole))
        }
        _ => None,
    };
    if coerced.is_none() {
        debug!(field = key, value = %value, "ignoring non-numeric extractor field");
    }
    coerced
}

fn non_negative_whole(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0).then(|| value.trunc() as u64)
}

fn string_list(raw: &Value, key: &str) -> Vec<String> {
    raw.get(key)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
