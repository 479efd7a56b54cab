#![forbid(unsafe_code)]

//! NeonTube HTTP server.
//!
//! JSON endpoints resolve everything through `yt-dlp` on demand; nothing is
//! stored except short-lived share cards. Any path outside `/api` is served
//! from the static web root with an `index.html` fallback for client routes.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use mime_guess::MimeGuess;
use neontube::cards::{CardError, CardStore, CardSweeper};
use neontube::catalog::{
    Catalog, CatalogError, DEFAULT_STREAM_QUALITY, StreamLinks, StreamMode, video_reference,
};
use neontube::config::{DEFAULT_ENV_PATH, RuntimeOverrides, RuntimeSettings, resolve_runtime_settings};
use neontube::extractor::{CommandRunner, ExtractorError, YtDlp};
use neontube::metadata::{ChannelInfo, ChannelStats, VideoDetail, VideoSummary};
use neontube::music::{MusicClient, MusicError, MusicTrackDetail};
use neontube::security::{ensure_not_root, is_video_id};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_TRENDING_RESULTS: usize = 20;
const DEFAULT_PAGE_SIZE: usize = 10;
const CHANNEL_PAGE_VIDEOS: usize = 10;

#[derive(Debug, Parser)]
#[command(name = "neontube-server", about = "Serve the NeonTube API and web client")]
struct ServerArgs {
    /// Address to listen on (overrides NEONTUBE_HOST).
    #[arg(long)]
    host: Option<IpAddr>,
    /// Port to listen on (overrides NEONTUBE_PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Directory holding the web client.
    #[arg(long)]
    www_root: Option<PathBuf>,
    /// Scratch directory for generated share cards.
    #[arg(long)]
    cards_dir: Option<PathBuf>,
    /// Path to the yt-dlp executable.
    #[arg(long)]
    ytdlp: Option<PathBuf>,
    /// Default region for trending and search.
    #[arg(long)]
    country: Option<String>,
    #[arg(long, default_value = DEFAULT_ENV_PATH)]
    env_file: PathBuf,
}

impl ServerArgs {
    fn overrides(&self) -> RuntimeOverrides {
        RuntimeOverrides {
            host: self.host.map(|host| host.to_string()),
            port: self.port,
            www_root: self.www_root.clone(),
            cards_dir: self.cards_dir.clone(),
            ytdlp_path: self.ytdlp.clone(),
            country: self.country.clone(),
            env_path: Some(self.env_file.clone()),
        }
    }
}

fn parse_host(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/NEONTUBE_HOST")
}

#[derive(Clone)]
struct AppState {
    catalog: Catalog,
    music: MusicClient,
    cards: CardStore,
    www_root: Arc<PathBuf>,
}

impl AppState {
    fn new(settings: &RuntimeSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            catalog: Catalog::new(runner, settings.catalog_settings()),
            music: MusicClient::new(settings.music_api_base.clone()),
            cards: CardStore::new(settings.cards_dir.clone()),
            www_root: Arc::new(settings.www_root.clone()),
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        error!(error = %err, "catalog request failed");
        let status = match &err {
            CatalogError::Failed {
                source: ExtractorError::Timeout { .. },
                ..
            } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<MusicError> for ApiError {
    fn from(err: MusicError) -> Self {
        error!(error = %err, "music request failed");
        let status = match &err {
            MusicError::Status(code) => {
                StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            MusicError::NotFound(_) => StatusCode::NOT_FOUND,
            MusicError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MusicError::Transport(_) | MusicError::Decode(_) => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<CardError> for ApiError {
    fn from(err: CardError) -> Self {
        match err {
            CardError::InvalidId(_) => Self::bad_request(err.to_string()),
            other => {
                error!(error = %other, "share card failed");
                Self::internal(other.to_string())
            }
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = ServerArgs::parse();
    ensure_not_root("neontube-server")?;

    let settings = resolve_runtime_settings(args.overrides())?;
    let host = parse_host(&settings.host)?;

    let ytdlp = YtDlp::new(settings.ytdlp_path.clone());
    match ytdlp.version().await {
        Ok(version) => info!(program = %ytdlp.program().display(), version = %version, "found yt-dlp"),
        Err(err) => warn!(error = %err, "yt-dlp is not usable; video endpoints will fail until it is installed"),
    }

    tokio::fs::create_dir_all(&settings.cards_dir)
        .await
        .with_context(|| format!("creating {}", settings.cards_dir.display()))?;
    let sweeper = CardSweeper::new(settings.cards_dir.clone());
    sweeper.start();

    let app = router(AppState::new(&settings, Arc::new(ytdlp)));

    let addr = SocketAddr::new(host, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(%addr, country = %settings.default_country, "NeonTube listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    sweeper.stop().await;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/trending", get(trending))
        .route("/api/search", get(search))
        .route("/api/video", get(video_detail))
        .route("/api/description", get(video_description))
        .route("/api/stream", get(stream))
        .route("/api/download", get(download))
        .route("/api/channels/{id}", get(channel_page))
        .route("/api/channel", get(channel_videos))
        .route("/api/music", get(music_catalog))
        .route("/api/music/{id}", get(music_track))
        .route("/api/videocard", get(video_card))
        .fallback(static_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
    info!("shutting down");
}

#[derive(Debug, Default, Deserialize)]
struct TrendingParams {
    country: Option<String>,
    max_results: Option<usize>,
}

#[derive(Debug, Serialize)]
struct TrendingResponse {
    videos: Vec<VideoSummary>,
    country: String,
}

async fn trending(
    State(state): State<AppState>,
    Query(params): Query<TrendingParams>,
) -> ApiResult<Json<TrendingResponse>> {
    let country = region(&state, params.country);
    let max_results = params.max_results.unwrap_or(DEFAULT_TRENDING_RESULTS);
    let videos = state.catalog.trending(&country, max_results).await?;
    Ok(Json(TrendingResponse { videos, country }))
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    q: Option<String>,
    max_results: Option<usize>,
    skip: Option<usize>,
    country: Option<String>,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    videos: Vec<VideoSummary>,
    total_available: usize,
    query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect: Option<String>,
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<SearchResponse>> {
    let query = params
        .q
        .map(|query| query.trim().to_string())
        .filter(|query| !query.is_empty())
        .ok_or_else(|| ApiError::bad_request("No search query provided"))?;

    if let Some(video_id) = video_reference(&query) {
        return Ok(Json(SearchResponse {
            videos: Vec::new(),
            total_available: 0,
            query,
            redirect: Some(format!("/watch?v={video_id}")),
        }));
    }

    let country = region(&state, params.country);
    let max_results = params.max_results.unwrap_or(DEFAULT_PAGE_SIZE);
    let skip = params.skip.unwrap_or(0);
    let fetch = page_end(skip, max_results)?;
    let all = state.catalog.search(&query, fetch, &country).await?;
    let total_available = all.len();
    let videos = all.into_iter().skip(skip).take(max_results).collect();

    Ok(Json(SearchResponse {
        videos,
        total_available,
        query,
        redirect: None,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct VideoParams {
    v: Option<String>,
    quality: Option<String>,
    mode: Option<String>,
}

async fn video_detail(
    State(state): State<AppState>,
    Query(params): Query<VideoParams>,
) -> ApiResult<Json<VideoDetail>> {
    let video_id = require_video_id(params.v)?;
    Ok(Json(state.catalog.video_detail(&video_id).await?))
}

async fn video_description(
    State(state): State<AppState>,
    Query(params): Query<VideoParams>,
) -> ApiResult<Json<Value>> {
    let video_id = require_video_id(params.v)?;
    let detail = state.catalog.video_detail(&video_id).await?;
    Ok(Json(serde_json::json!({ "description": detail.description })))
}

async fn stream(
    State(state): State<AppState>,
    Query(params): Query<VideoParams>,
) -> ApiResult<Json<StreamLinks>> {
    let video_id = require_video_id(params.v)?;
    let quality = params
        .quality
        .unwrap_or_else(|| DEFAULT_STREAM_QUALITY.to_string());
    let mode = params
        .mode
        .as_deref()
        .map(StreamMode::parse)
        .unwrap_or_default();
    Ok(Json(
        state.catalog.stream_links(&video_id, &quality, mode).await?,
    ))
}

async fn download(
    State(state): State<AppState>,
    Query(params): Query<VideoParams>,
) -> ApiResult<Json<Value>> {
    let video_id = require_video_id(params.v)?;
    let quality = params
        .quality
        .unwrap_or_else(|| DEFAULT_STREAM_QUALITY.to_string());
    let url = state.catalog.stream_url(&video_id, &quality).await?;
    Ok(Json(serde_json::json!({ "url": url })))
}

#[derive(Serialize)]
struct ChannelPage {
    id: String,
    channel: ChannelInfo,
    stats: ChannelStats,
    videos: Vec<VideoSummary>,
}

async fn channel_page(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<ChannelPage>> {
    let id = id.strip_prefix('@').unwrap_or(&id).to_string();
    if id.is_empty() {
        return Err(ApiError::bad_request("No channel ID provided"));
    }

    let (channel, videos) = tokio::join!(
        state.catalog.channel_info(&id),
        state.catalog.channel_videos(&id, CHANNEL_PAGE_VIDEOS, 0),
    );
    let videos = videos?;
    let stats = ChannelStats::from_videos(&videos);

    Ok(Json(ChannelPage {
        id,
        channel,
        stats,
        videos,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct ChannelParams {
    id: Option<String>,
    max_results: Option<usize>,
    skip: Option<usize>,
    update_stats: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChannelVideosResponse {
    videos: Vec<VideoSummary>,
    channel_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_stats: Option<ChannelStats>,
}

async fn channel_videos(
    State(state): State<AppState>,
    Query(params): Query<ChannelParams>,
) -> ApiResult<Json<ChannelVideosResponse>> {
    let channel_id = params
        .id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("No channel ID provided"))?;
    let max_results = params.max_results.unwrap_or(DEFAULT_PAGE_SIZE);
    let skip = params.skip.unwrap_or(0);
    let update_stats = params
        .update_stats
        .is_some_and(|value| value.eq_ignore_ascii_case("true"));
    let loaded_end = page_end(skip, max_results)?;
    let videos = state
        .catalog
        .channel_videos(&channel_id, max_results, skip)
        .await?;

    let channel_stats = if update_stats && skip > 0 {
        let loaded = state
            .catalog
            .channel_videos(&channel_id, loaded_end, 0)
            .await?;
        Some(ChannelStats::from_videos(&loaded))
    } else {
        None
    };

    Ok(Json(ChannelVideosResponse {
        videos,
        channel_id,
        channel_stats,
    }))
}

async fn music_catalog(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    Ok(Json(state.music.catalog().await?))
}

async fn music_track(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<MusicTrackDetail>> {
    Ok(Json(state.music.track(&id).await?))
}

async fn video_card(
    State(state): State<AppState>,
    Query(params): Query<VideoParams>,
) -> ApiResult<Response> {
    let video_id = require_video_id(params.v)?;

    let cards = state.cards.clone();
    let id = video_id.clone();
    let cached = tokio::task::spawn_blocking(move || cards.cached(&id))
        .await
        .map_err(|err| ApiError::internal(err.to_string()))??;
    if let Some(png) = cached {
        return Ok(png_response(png));
    }

    let detail = state.catalog.video_detail(&video_id).await?;
    let cards = state.cards.clone();
    let png = tokio::task::spawn_blocking(move || cards.build(&video_id, &detail))
        .await
        .map_err(|err| ApiError::internal(err.to_string()))??;
    Ok(png_response(png))
}

fn png_response(png: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "image/png")], png).into_response()
}

/// Index one past the last requested item; rejects offsets that overflow.
fn page_end(skip: usize, max_results: usize) -> ApiResult<usize> {
    skip.checked_add(max_results)
        .ok_or_else(|| ApiError::bad_request("skip and max_results are too large"))
}

fn require_video_id(value: Option<String>) -> ApiResult<String> {
    let value = value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::bad_request("No video ID provided"))?;
    if !is_video_id(&value) {
        return Err(ApiError::bad_request(format!("invalid video ID: {value}")));
    }
    Ok(value)
}

fn region(state: &AppState, requested: Option<String>) -> String {
    requested
        .map(|country| country.trim().to_ascii_uppercase())
        .filter(|country| !country.is_empty())
        .unwrap_or_else(|| state.catalog.default_country().to_string())
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }

    match serve_www_path(&state.www_root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    let index = root.join("index.html");

    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => stream_file(index).await,
        Ok(_) => stream_file(target).await,
        Err(_) if should_fallback_to_index(request_path) => stream_file(index).await,
        Err(_) => Err(ApiError::not_found("file not found")),
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

// Client-side routes like `/watch` have no extension; assets always do.
fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    trimmed.is_empty() || Path::new(trimmed).extension().is_none()
}

async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = mime.to_string().parse()
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}
