#![forbid(unsafe_code)]

//! Query operations behind every page: search, trending, channel listings,
//! channel info, video detail and stream-link resolution.
//!
//! Each operation is a short, fixed chain of tiers. A later tier only runs
//! after the earlier one failed or came back empty, and tiers never run in
//! parallel. Results from a non-primary tier are "degraded": still valid
//! records, but scoped globally or filled with placeholders.

use std::{future::Future, sync::Arc, sync::LazyLock, time::Duration};

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::extractor::{CommandRunner, ExtractorError};
use crate::metadata::{
    ChannelInfo, GLOBAL_REGION, VideoDetail, VideoSummary, normalize_channel, normalize_detail,
    parse_listing,
};
use crate::security::is_video_id;

pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const TRENDING_TIMEOUT: Duration = Duration::from_secs(10);
pub const CHANNEL_VIDEOS_TIMEOUT: Duration = Duration::from_secs(30);
pub const CHANNEL_INFO_TIMEOUT: Duration = Duration::from_secs(3);
pub const CHANNEL_INFO_FALLBACK_TIMEOUT: Duration = Duration::from_secs(2);
pub const DETAIL_TIMEOUT: Duration = Duration::from_secs(30);
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_STREAM_QUALITY: &str = "720";
const TRENDING_FALLBACK_QUERY: &str = "YouTube trending";
const SKIP_STREAMING_MANIFESTS: &str = "youtube:skip=dash,hls";

static VIDEO_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:youtube\.com/(?:[^/\s]+/\S+/|(?:v|e(?:mbed)?|shorts|live)/|\S*?[?&]v=)|youtu\.be/)([A-Za-z0-9_-]{11})",
    )
    .expect("video link pattern is valid")
});

/// Raised once an operation has no tier left to try.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{operation} failed: {source}")]
    Failed {
        operation: &'static str,
        #[source]
        source: ExtractorError,
    },

    #[error("{operation} returned malformed JSON: {source}")]
    Malformed {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{operation} produced no output")]
    Empty { operation: &'static str },
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    /// Region used when a caller does not pick one (also used by the
    /// channel-listing search fallback).
    pub default_country: String,
    /// Interface language hinted to the extractor on region-scoped searches.
    pub language: String,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            default_country: "TR".to_string(),
            language: "tr".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamMode {
    #[default]
    Normal,
    Experimental,
}

impl StreamMode {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "experimental" => Self::Experimental,
            _ => Self::Normal,
        }
    }
}

/// Playback links handed to the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StreamLinks {
    Normal { url: String },
    Experimental { video_url: String, audio_url: String },
}

#[derive(Clone)]
pub struct Catalog {
    runner: Arc<dyn CommandRunner>,
    settings: CatalogSettings,
}

impl Catalog {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: CatalogSettings) -> Self {
        Self { runner, settings }
    }

    pub fn default_country(&self) -> &str {
        &self.settings.default_country
    }

    /// Region-scoped search, falling back to an unscoped one tagged `GLOBAL`.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        country: &str,
    ) -> Result<Vec<VideoSummary>, CatalogError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }
        let target = format!("ytsearch{max_results}:{query}");
        let region_hint = format!("youtube:lang={},region={country}", self.settings.language);
        let primary = flat_dump_args(&[&region_hint], &target);
        let fallback = flat_dump_args(&[], &target);

        with_fallback(
            "search",
            move || self.listing(primary, SEARCH_TIMEOUT, Some(country)),
            move || self.listing(fallback, SEARCH_TIMEOUT, Some(GLOBAL_REGION)),
        )
        .await
    }

    /// Country trending feed, falling back to a date-sorted search that acts
    /// as a global trending proxy.
    pub async fn trending(
        &self,
        country: &str,
        max_results: usize,
    ) -> Result<Vec<VideoSummary>, CatalogError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }
        let feed = format!("https://www.youtube.com/feed/trending?gl={country}");
        let range = format!("1:{max_results}");
        let primary = flat_dump_args(&[SKIP_STREAMING_MANIFESTS, "-I", &range], &feed);
        let fallback = flat_dump_args(
            &[],
            &format!("ytsearchdate{max_results}:{TRENDING_FALLBACK_QUERY}"),
        );

        with_fallback(
            "trending",
            move || self.listing(primary, TRENDING_TIMEOUT, Some(country)),
            move || self.listing(fallback, TRENDING_TIMEOUT, Some(GLOBAL_REGION)),
        )
        .await
    }

    /// One page of a channel's uploads.
    ///
    /// Pagination is by over-fetching: every call lists the first
    /// `skip + max_results` uploads and drops the first `skip`, so deep pages
    /// cost more than shallow ones. A URL convention only wins when the
    /// requested page itself is non-empty.
    pub async fn channel_videos(
        &self,
        channel_id: &str,
        max_results: usize,
        skip: usize,
    ) -> Result<Vec<VideoSummary>, CatalogError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }
        let range = format!("1:{}", skip.saturating_add(max_results));

        for url in channel_urls(channel_id, "/videos") {
            let args = flat_dump_args(&[SKIP_STREAMING_MANIFESTS, "-I", &range], &url);
            match self.listing(args, CHANNEL_VIDEOS_TIMEOUT, None).await {
                Ok(videos) => {
                    let fetched = videos.len();
                    let page: Vec<_> = videos.into_iter().skip(skip).take(max_results).collect();
                    if !page.is_empty() {
                        debug!(channel = channel_id, url = %url, fetched, "channel listing resolved");
                        return Ok(page);
                    }
                    debug!(channel = channel_id, url = %url, fetched, "channel page empty");
                }
                Err(err) => {
                    warn!(channel = channel_id, url = %url, error = %err, "channel listing failed")
                }
            }
        }

        info!(channel = channel_id, "channel not found, falling back to search");
        self.search(channel_id, max_results, &self.settings.default_country)
            .await
    }

    /// Channel header data. Never fails: when both lookups fail the caller
    /// gets [`ChannelInfo::placeholder`].
    pub async fn channel_info(&self, channel_id: &str) -> ChannelInfo {
        let [handle_url, numeric_url] = channel_urls(channel_id, "");
        let attempts = [
            (handle_url, CHANNEL_INFO_TIMEOUT),
            (numeric_url, CHANNEL_INFO_FALLBACK_TIMEOUT),
        ];

        for (url, limit) in attempts {
            let args = strings(&[
                "--dump-single-json",
                "--flat-playlist",
                "-I",
                "1",
                "--extractor-args",
                SKIP_STREAMING_MANIFESTS,
                &url,
            ]);
            match self.document("channel info", args, limit).await {
                Ok(raw) => return normalize_channel(&raw, channel_id, &url),
                Err(err) => warn!(channel = channel_id, url = %url, error = %err, "channel lookup failed"),
            }
        }

        warn!(channel = channel_id, "using placeholder channel info");
        ChannelInfo::placeholder(channel_id)
    }

    /// Full metadata for the watch page. Single tier: failures surface to the
    /// caller instead of being papered over.
    pub async fn video_detail(&self, video_id: &str) -> Result<VideoDetail, CatalogError> {
        let args = strings(&["--dump-json", "--no-playlist", &watch_url(video_id)]);
        let raw = self.document("video detail", args, DETAIL_TIMEOUT).await?;
        Ok(normalize_detail(&raw, video_id))
    }

    /// Resolves playback links. Experimental mode at `best` quality asks for
    /// separate video and audio streams and degrades to a combined 720p
    /// stream when either cannot be resolved.
    pub async fn stream_links(
        &self,
        video_id: &str,
        quality: &str,
        mode: StreamMode,
    ) -> Result<StreamLinks, CatalogError> {
        if mode == StreamMode::Experimental && quality.trim() == "best" {
            match self.separate_streams(video_id).await {
                Ok(links) => {
                    info!(video = video_id, "selected best video and audio streams");
                    return Ok(links);
                }
                Err(err) => {
                    warn!(video = video_id, error = %err, "separate streams unavailable, using combined stream")
                }
            }
            let url = self.stream_url(video_id, DEFAULT_STREAM_QUALITY).await?;
            return Ok(StreamLinks::Normal { url });
        }

        let url = self.stream_url(video_id, quality).await?;
        Ok(StreamLinks::Normal { url })
    }

    /// Direct URL of a combined audio+video stream no taller than `quality`.
    pub async fn stream_url(&self, video_id: &str, quality: &str) -> Result<String, CatalogError> {
        self.resolve(video_id, &format_selector(quality)).await
    }

    async fn separate_streams(&self, video_id: &str) -> Result<StreamLinks, CatalogError> {
        let video_url = self.resolve(video_id, "bestvideo").await?;
        let audio_url = self.resolve(video_id, "bestaudio").await?;
        Ok(StreamLinks::Experimental {
            video_url,
            audio_url,
        })
    }

    async fn resolve(&self, video_id: &str, selector: &str) -> Result<String, CatalogError> {
        let operation = "stream resolution";
        let args = strings(&["-f", selector, "-g", "--no-playlist", &watch_url(video_id)]);
        let output = self
            .runner
            .run(&args, STREAM_TIMEOUT)
            .await
            .map_err(|source| CatalogError::Failed { operation, source })?;
        output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or(CatalogError::Empty { operation })
    }

    async fn listing(
        &self,
        args: Vec<String>,
        limit: Duration,
        country: Option<&str>,
    ) -> Result<Vec<VideoSummary>, ExtractorError> {
        let output = self.runner.run(&args, limit).await?;
        Ok(parse_listing(&output, country))
    }

    async fn document(
        &self,
        operation: &'static str,
        args: Vec<String>,
        limit: Duration,
    ) -> Result<Value, CatalogError> {
        let output = self
            .runner
            .run(&args, limit)
            .await
            .map_err(|source| CatalogError::Failed { operation, source })?;
        serde_json::from_str(&output).map_err(|source| CatalogError::Malformed { operation, source })
    }
}

/// Runs `primary`; if it fails or returns nothing, runs `fallback` exactly
/// once. Only the fallback's failure is raised.
async fn with_fallback<T, P, PF, F, FF>(
    operation: &'static str,
    primary: P,
    fallback: F,
) -> Result<Vec<T>, CatalogError>
where
    P: FnOnce() -> PF,
    PF: Future<Output = Result<Vec<T>, ExtractorError>>,
    F: FnOnce() -> FF,
    FF: Future<Output = Result<Vec<T>, ExtractorError>>,
{
    match primary().await {
        Ok(records) if !records.is_empty() => return Ok(records),
        Ok(_) => warn!(operation, "primary tier returned nothing, trying fallback"),
        Err(err) => warn!(operation, error = %err, "primary tier failed, trying fallback"),
    }

    match fallback().await {
        Ok(records) => {
            info!(operation, count = records.len(), "serving degraded results");
            Ok(records)
        }
        Err(source) => {
            error!(operation, error = %source, "every tier failed");
            Err(CatalogError::Failed { operation, source })
        }
    }
}

/// Finds a video id inside a search query: either a watch/short/embed link or
/// a bare 11 character id.
///
/// Plain words that happen to be 11 letters long ("programming") are not
/// treated as ids; a bare id must contain a digit, `-`, `_` or an uppercase
/// letter after the first character.
pub fn video_reference(query: &str) -> Option<String> {
    if let Some(captures) = VIDEO_LINK.captures(query) {
        return captures.get(1).map(|id| id.as_str().to_string());
    }

    let trimmed = query.trim();
    let looks_generated = trimmed
        .chars()
        .skip(1)
        .any(|c| c.is_ascii_digit() || c == '-' || c == '_' || c.is_ascii_uppercase());
    (is_video_id(trimmed) && looks_generated).then(|| trimmed.to_string())
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Handle-style URL first, then the numeric `/channel/` form.
fn channel_urls(channel_id: &str, suffix: &str) -> [String; 2] {
    let handle = channel_id.trim_start_matches('@');
    [
        format!("https://www.youtube.com/@{handle}{suffix}"),
        format!("https://www.youtube.com/channel/{handle}{suffix}"),
    ]
}

fn format_selector(quality: &str) -> String {
    let quality = quality.trim();
    if quality == "best" {
        return "best".to_string();
    }
    let height = if !quality.is_empty() && quality.bytes().all(|byte| byte.is_ascii_digit()) {
        quality
    } else {
        DEFAULT_STREAM_QUALITY
    };
    format!("best[height<={height}]")
}

/// Flat-playlist dump arguments. `extra` is inserted after
/// `--extractor-args` when it starts with an extractor hint.
fn flat_dump_args(extra: &[&str], target: &str) -> Vec<String> {
    let mut args = strings(&["--flat-playlist", "--dump-json"]);
    if let Some((hint, rest)) = extra.split_first() {
        args.push("--extractor-args".to_string());
        args.push(hint.to_string());
        args.extend(rest.iter().map(|value| value.to_string()));
    }
    args.push(target.to_string());
    args
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    type Call = (Vec<String>, Duration);

    /// Replays canned extractor responses in order and records every call.
    struct ScriptedRunner {
        responses: Mutex<VecDeque<Result<String, ExtractorError>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl ScriptedRunner {
        fn new(responses: Vec<Result<String, ExtractorError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, args: &[String], limit: Duration) -> Result<String, ExtractorError> {
            self.calls.lock().push((args.to_vec(), limit));
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(failure()))
        }
    }

    fn failure() -> ExtractorError {
        ExtractorError::Execution {
            command: "yt-dlp".into(),
            status: "exit status: 1".into(),
            stderr: "ERROR: unavailable".into(),
        }
    }

    fn timed_out() -> ExtractorError {
        ExtractorError::Timeout {
            command: "yt-dlp".into(),
            limit: Duration::from_secs(3),
        }
    }

    fn listing(count: usize) -> String {
        (0..count)
            .map(|index| {
                json!({ "id": format!("vid{index:08}"), "title": format!("Video {index}") })
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn catalog(runner: &Arc<ScriptedRunner>) -> Catalog {
        Catalog::new(runner.clone(), CatalogSettings::default())
    }

    fn has_arg(call: &Call, value: &str) -> bool {
        call.0.iter().any(|arg| arg == value)
    }

    #[tokio::test]
    async fn search_keeps_region_when_primary_succeeds() {
        let runner = ScriptedRunner::new(vec![Ok(listing(3))]);
        let videos = catalog(&runner).search("rust lang", 5, "US").await.unwrap();

        assert_eq!(videos.len(), 3);
        assert!(videos.iter().all(|video| video.country.as_deref() == Some("US")));
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(has_arg(&calls[0], "youtube:lang=tr,region=US"));
        assert_eq!(calls[0].0.last().unwrap(), "ytsearch5:rust lang");
        assert_eq!(calls[0].1, SEARCH_TIMEOUT);
    }

    #[tokio::test]
    async fn search_issues_one_global_fallback_when_primary_is_empty() {
        let runner = ScriptedRunner::new(vec![Ok(String::new()), Ok(listing(2))]);
        let videos = catalog(&runner).search("rust", 10, "TR").await.unwrap();

        assert_eq!(videos.len(), 2);
        assert!(videos.iter().all(|video| video.country.as_deref() == Some(GLOBAL_REGION)));
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(!has_arg(&calls[1], "--extractor-args"));
        assert_eq!(calls[1].0.last().unwrap(), "ytsearch10:rust");
    }

    #[tokio::test]
    async fn search_falls_back_after_primary_failure() {
        let runner = ScriptedRunner::new(vec![Err(timed_out()), Ok(listing(1))]);
        let videos = catalog(&runner).search("rust", 10, "TR").await.unwrap();
        assert_eq!(videos[0].country.as_deref(), Some(GLOBAL_REGION));
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn search_raises_when_both_tiers_fail() {
        let runner = ScriptedRunner::new(vec![Err(failure()), Err(timed_out())]);
        let err = catalog(&runner).search("rust", 10, "TR").await.unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Failed {
                operation: "search",
                source: ExtractorError::Timeout { .. }
            }
        ));
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn trending_uses_country_feed_then_dated_search() {
        let runner = ScriptedRunner::new(vec![Err(failure()), Ok(listing(4))]);
        let videos = catalog(&runner).trending("DE", 20).await.unwrap();

        assert_eq!(videos.len(), 4);
        assert!(videos.iter().all(|video| video.country.as_deref() == Some(GLOBAL_REGION)));
        let calls = runner.calls();
        assert_eq!(
            calls[0].0.last().unwrap(),
            "https://www.youtube.com/feed/trending?gl=DE"
        );
        assert!(has_arg(&calls[0], "1:20"));
        assert_eq!(calls[1].0.last().unwrap(), "ytsearchdate20:YouTube trending");
    }

    #[tokio::test]
    async fn trending_primary_results_are_tagged_with_country() {
        let runner = ScriptedRunner::new(vec![Ok(listing(2))]);
        let videos = catalog(&runner).trending("DE", 2).await.unwrap();
        assert!(videos.iter().all(|video| video.country.as_deref() == Some("DE")));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn channel_videos_over_fetch_and_slice() {
        let runner = ScriptedRunner::new(vec![Ok(listing(30))]);
        let videos = catalog(&runner)
            .channel_videos("space", 10, 20)
            .await
            .unwrap();

        let ids: Vec<_> = videos.iter().map(|video| video.id.as_str()).collect();
        let expected: Vec<_> = (20..30).map(|index| format!("vid{index:08}")).collect();
        assert_eq!(ids, expected);
        assert!(videos.iter().all(|video| video.country.is_none()));

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(has_arg(&calls[0], "1:30"));
        assert_eq!(
            calls[0].0.last().unwrap(),
            "https://www.youtube.com/@space/videos"
        );
        assert_eq!(calls[0].1, CHANNEL_VIDEOS_TIMEOUT);
    }

    #[tokio::test]
    async fn channel_videos_return_short_page_at_the_end() {
        let runner = ScriptedRunner::new(vec![Ok(listing(25))]);
        let videos = catalog(&runner)
            .channel_videos("@space", 10, 20)
            .await
            .unwrap();
        assert_eq!(videos.len(), 5);
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn channel_videos_past_the_end_try_next_url_then_search() {
        let runner = ScriptedRunner::new(vec![Ok(listing(25)), Ok(listing(25)), Ok(listing(4))]);
        let videos = catalog(&runner)
            .channel_videos("space", 10, 30)
            .await
            .unwrap();

        assert_eq!(videos.len(), 4);
        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(has_arg(&calls[0], "1:40"));
        assert_eq!(
            calls[1].0.last().unwrap(),
            "https://www.youtube.com/channel/space/videos"
        );
        assert_eq!(calls[2].0.last().unwrap(), "ytsearch10:space");
    }

    #[tokio::test]
    async fn channel_videos_saturate_huge_offsets() {
        let runner = ScriptedRunner::new(vec![Ok(listing(3)), Ok(listing(3)), Ok(listing(1))]);
        let videos = catalog(&runner)
            .channel_videos("space", 1, usize::MAX)
            .await
            .unwrap();

        assert_eq!(videos.len(), 1);
        let calls = runner.calls();
        assert!(has_arg(&calls[0], &format!("1:{}", usize::MAX)));
    }

    #[tokio::test]
    async fn channel_videos_try_numeric_url_after_handle() {
        let runner = ScriptedRunner::new(vec![Err(failure()), Ok(listing(3))]);
        let videos = catalog(&runner)
            .channel_videos("UC123", 10, 0)
            .await
            .unwrap();
        assert_eq!(videos.len(), 3);

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[1].0.last().unwrap(),
            "https://www.youtube.com/channel/UC123/videos"
        );
    }

    #[tokio::test]
    async fn channel_videos_fall_back_to_search() {
        let runner = ScriptedRunner::new(vec![Ok(String::new()), Err(failure()), Ok(listing(2))]);
        let videos = catalog(&runner)
            .channel_videos("space", 10, 0)
            .await
            .unwrap();

        assert_eq!(videos.len(), 2);
        assert!(videos.iter().all(|video| video.country.as_deref() == Some("TR")));
        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].0.last().unwrap(), "ytsearch10:space");
    }

    #[tokio::test]
    async fn channel_videos_with_zero_page_size_do_nothing() {
        let runner = ScriptedRunner::new(vec![]);
        let videos = catalog(&runner).channel_videos("space", 0, 5).await.unwrap();
        assert!(videos.is_empty());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn zero_sized_search_and_trending_skip_the_extractor() {
        let runner = ScriptedRunner::new(vec![]);
        let catalog = catalog(&runner);
        assert!(catalog.search("rust", 0, "US").await.unwrap().is_empty());
        assert!(catalog.trending("US", 0).await.unwrap().is_empty());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn channel_info_stops_after_primary_success() {
        let runner = ScriptedRunner::new(vec![Ok(json!({
            "channel": "Space Channel",
            "channel_id": "UC123",
            "subscriber_count": 1200
        })
        .to_string())]);
        let info = catalog(&runner).channel_info("space").await;

        assert_eq!(info.name, "Space Channel");
        assert_eq!(info.subscriber_count, "1200");
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, CHANNEL_INFO_TIMEOUT);
        assert_eq!(calls[0].0.last().unwrap(), "https://www.youtube.com/@space");
    }

    #[tokio::test]
    async fn channel_info_retries_numeric_url_with_shorter_timeout() {
        let runner = ScriptedRunner::new(vec![
            Err(timed_out()),
            Ok(json!({ "uploader": "Fallback" }).to_string()),
        ]);
        let info = catalog(&runner).channel_info("UC123").await;

        assert_eq!(info.name, "Fallback");
        assert_eq!(info.channel_url, "https://www.youtube.com/channel/UC123");
        let calls = runner.calls();
        assert_eq!(calls[1].1, CHANNEL_INFO_FALLBACK_TIMEOUT);
        assert!(calls[1].1 < calls[0].1);
    }

    #[tokio::test]
    async fn channel_info_degrades_to_placeholder() {
        let runner = ScriptedRunner::new(vec![Err(failure()), Ok("not json".into())]);
        let info = catalog(&runner).channel_info("space").await;
        assert!(info.name.contains("space"));
        assert_eq!(info.subscriber_count, "N/A");
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn video_detail_dumps_single_video() {
        let runner = ScriptedRunner::new(vec![Ok(json!({
            "title": "Deep dive",
            "duration": 3661,
            "like_count": 1500
        })
        .to_string())]);
        let detail = catalog(&runner).video_detail("dQw4w9WgXcQ").await.unwrap();

        assert_eq!(detail.summary.title, "Deep dive");
        assert_eq!(detail.summary.duration.as_deref(), Some("01:01:01"));
        assert_eq!(detail.likes, "1.5K");
        let calls = runner.calls();
        assert!(has_arg(&calls[0], "--no-playlist"));
        assert!(has_arg(&calls[0], "https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert_eq!(calls[0].1, DETAIL_TIMEOUT);
    }

    #[tokio::test]
    async fn video_detail_surfaces_failures() {
        let runner = ScriptedRunner::new(vec![Err(failure())]);
        let err = catalog(&runner).video_detail("abc").await.unwrap_err();
        assert!(matches!(err, CatalogError::Failed { .. }));
        assert_eq!(runner.calls().len(), 1);

        let runner = ScriptedRunner::new(vec![Ok("{ truncated".into())]);
        let err = catalog(&runner).video_detail("abc").await.unwrap_err();
        assert!(matches!(err, CatalogError::Malformed { .. }));
    }

    #[tokio::test]
    async fn stream_links_cap_height_in_normal_mode() {
        let runner = ScriptedRunner::new(vec![Ok("https://cdn.example/480.mp4\n".into())]);
        let links = catalog(&runner)
            .stream_links("abc", "480", StreamMode::Normal)
            .await
            .unwrap();
        assert_eq!(
            links,
            StreamLinks::Normal {
                url: "https://cdn.example/480.mp4".into()
            }
        );
        assert!(has_arg(&runner.calls()[0], "best[height<=480]"));
    }

    #[tokio::test]
    async fn stream_links_split_in_experimental_mode() {
        let runner = ScriptedRunner::new(vec![
            Ok("https://cdn.example/video".into()),
            Ok("https://cdn.example/audio".into()),
        ]);
        let links = catalog(&runner)
            .stream_links("abc", "best", StreamMode::Experimental)
            .await
            .unwrap();
        assert_eq!(
            links,
            StreamLinks::Experimental {
                video_url: "https://cdn.example/video".into(),
                audio_url: "https://cdn.example/audio".into(),
            }
        );
        let calls = runner.calls();
        assert!(has_arg(&calls[0], "bestvideo"));
        assert!(has_arg(&calls[1], "bestaudio"));
    }

    #[tokio::test]
    async fn experimental_mode_degrades_to_combined_stream() {
        let runner = ScriptedRunner::new(vec![
            Ok("https://cdn.example/video".into()),
            Err(failure()),
            Ok("https://cdn.example/720.mp4".into()),
        ]);
        let links = catalog(&runner)
            .stream_links("abc", "best", StreamMode::Experimental)
            .await
            .unwrap();
        assert_eq!(
            links,
            StreamLinks::Normal {
                url: "https://cdn.example/720.mp4".into()
            }
        );
        assert!(has_arg(&runner.calls()[2], "best[height<=720]"));
    }

    #[tokio::test]
    async fn stream_resolution_without_output_is_an_error() {
        let runner = ScriptedRunner::new(vec![Ok("   ".into())]);
        let err = catalog(&runner).stream_url("abc", "720").await.unwrap_err();
        assert!(matches!(err, CatalogError::Empty { .. }));
    }

    #[test]
    fn stream_links_serialize_with_mode_tag() {
        let value = serde_json::to_value(StreamLinks::Normal { url: "u".into() }).unwrap();
        assert_eq!(value, json!({ "mode": "normal", "url": "u" }));
    }

    #[test]
    fn format_selector_accepts_numeric_heights_only() {
        assert_eq!(format_selector("1080"), "best[height<=1080]");
        assert_eq!(format_selector("best"), "best");
        assert_eq!(format_selector("]; rm"), "best[height<=720]");
        assert_eq!(format_selector(""), "best[height<=720]");
    }

    #[test]
    fn video_reference_detects_links_and_ids() {
        assert_eq!(
            video_reference("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            video_reference("look at youtu.be/dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            video_reference("https://youtube.com/shorts/abcDEF12345").as_deref(),
            Some("abcDEF12345")
        );
        assert_eq!(video_reference(" dQw4w9WgXcQ ").as_deref(), Some("dQw4w9WgXcQ"));
    }

    #[test]
    fn video_reference_ignores_plain_queries() {
        assert_eq!(video_reference("programming"), None);
        assert_eq!(video_reference("rust async tutorial"), None);
        assert_eq!(video_reference("dQw4w9WgXcQQ"), None);
    }

    #[test]
    fn stream_mode_parse_defaults_to_normal() {
        assert_eq!(StreamMode::parse("experimental"), StreamMode::Experimental);
        assert_eq!(StreamMode::parse("EXPERIMENTAL "), StreamMode::Experimental);
        assert_eq!(StreamMode::parse("other"), StreamMode::Normal);
    }
}
