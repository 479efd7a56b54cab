#![forbid(unsafe_code)]

//! Share cards: a 1280x720 PNG built around a video's thumbnail, cached in a
//! scratch directory that a background sweeper keeps small.

use std::{
    fs,
    io::{Cursor, Read},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use ab_glyph::{FontVec, PxScale};
use image::{
    ImageFormat, Rgb, RgbImage,
    imageops::{self, FilterType},
};
use imageproc::drawing::{draw_text_mut, text_size};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::metadata::VideoDetail;
use crate::security::is_video_id;

pub const CARD_WIDTH: u32 = 1280;
pub const CARD_HEIGHT: u32 = 720;
pub const CARD_MAX_AGE: Duration = Duration::from_secs(5 * 60);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const THUMB_WIDTH: u32 = 800;
const THUMB_HEIGHT: u32 = 450;
const THUMB_TOP: u32 = 50;
const BORDER: u32 = 3;
const GLOW_SIGMA: f32 = 20.0;
const MAX_THUMBNAIL_BYTES: u64 = 10 * 1024 * 1024;

const BACKGROUND: Rgb<u8> = Rgb([0x0d, 0x0d, 0x0d]);
const GLOW: Rgb<u8> = Rgb([0x9d, 0x4e, 0xdd]);
const ACCENT: Rgb<u8> = Rgb([0xff, 0x85, 0x00]);
const TITLE_COLOR: Rgb<u8> = Rgb([0xff, 0xff, 0xff]);

pub const TITLE_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf";
pub const BODY_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

const TITLE_SIZE: f32 = 42.0;
const CHANNEL_SIZE: f32 = 28.0;
const STATS_SIZE: f32 = 24.0;
const LINE_SPACING: u32 = 50;
const TEXT_MARGIN: u32 = 40;
const CALL_TO_ACTION: &str = "Watch on NeonTube!";

#[derive(Debug, Error)]
pub enum CardError {
    #[error("invalid video id: {0:?}")]
    InvalidId(String),

    #[error("thumbnail request failed: {0}")]
    Fetch(String),

    #[error("thumbnail could not be decoded: {0}")]
    Image(#[from] image::ImageError),

    #[error("card cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Typefaces for the card captions. A missing face leaves its lines blank.
#[derive(Default)]
pub struct CardFonts {
    title: Option<FontVec>,
    body: Option<FontVec>,
}

impl CardFonts {
    pub fn load(title: &Path, body: &Path) -> Self {
        Self {
            title: load_font(title),
            body: load_font(body),
        }
    }

    pub fn system() -> Self {
        Self::load(Path::new(TITLE_FONT_PATH), Path::new(BODY_FONT_PATH))
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.body.is_none()
    }
}

fn load_font(path: &Path) -> Option<FontVec> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "card font unavailable; captions skipped");
            return None;
        }
    };
    match FontVec::try_from_vec(bytes) {
        Ok(font) => Some(font),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "card font unreadable; captions skipped");
            None
        }
    }
}

/// Caption lines drawn under the thumbnail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardText {
    pub title: String,
    pub channel: String,
    pub stats: String,
}

impl CardText {
    pub fn from_detail(detail: &VideoDetail) -> Self {
        let summary = &detail.summary;
        let views = summary.view_count.as_deref().unwrap_or("0");
        let stats = if summary.published_at.is_empty() {
            format!("{views} views")
        } else {
            format!("{views} views  \u{2022}  {}", summary.published_at)
        };
        Self {
            title: summary.title.clone(),
            channel: format!("by {}", summary.channel),
            stats,
        }
    }
}

/// Card cache rooted at one scratch directory. All methods block; call them
/// from `spawn_blocking`.
#[derive(Clone)]
pub struct CardStore {
    dir: PathBuf,
    agent: ureq::Agent,
    fonts: Arc<CardFonts>,
}

impl CardStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_fonts(dir, CardFonts::system())
    }

    pub fn with_fonts(dir: impl Into<PathBuf>, fonts: CardFonts) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(10))
            .build();
        Self {
            dir: dir.into(),
            agent,
            fonts: Arc::new(fonts),
        }
    }

    pub fn card_path(&self, video_id: &str) -> Result<PathBuf, CardError> {
        if !is_video_id(video_id) {
            return Err(CardError::InvalidId(video_id.to_string()));
        }
        Ok(self.dir.join(format!("{video_id}.png")))
    }

    /// The cached card when one younger than [`CARD_MAX_AGE`] exists.
    pub fn cached(&self, video_id: &str) -> Result<Option<Vec<u8>>, CardError> {
        let path = self.card_path(video_id)?;
        if !is_fresh(&path, SystemTime::now(), CARD_MAX_AGE) {
            return Ok(None);
        }
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            // Swept between the freshness check and the read.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Downloads the thumbnail, renders the card and writes it to the cache.
    pub fn build(&self, video_id: &str, detail: &VideoDetail) -> Result<Vec<u8>, CardError> {
        let path = self.card_path(video_id)?;
        let thumbnail = self.fetch_thumbnail(&detail.summary.thumbnail)?;
        let png = render_card(&thumbnail, &CardText::from_detail(detail), &self.fonts)?;
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, &png)?;
        debug!(video = video_id, path = %path.display(), "stored share card");
        Ok(png)
    }

    fn fetch_thumbnail(&self, url: &str) -> Result<Vec<u8>, CardError> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|err| CardError::Fetch(err.to_string()))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_THUMBNAIL_BYTES)
            .read_to_end(&mut bytes)?;
        if bytes.is_empty() {
            return Err(CardError::Fetch(format!("empty response from {url}")));
        }
        Ok(bytes)
    }
}

/// Renders the card around an encoded thumbnail (any format `image` decodes)
/// with the captions centred below it.
pub fn render_card(
    thumbnail: &[u8],
    text: &CardText,
    fonts: &CardFonts,
) -> Result<Vec<u8>, CardError> {
    let thumbnail = image::load_from_memory(thumbnail)?
        .resize_exact(THUMB_WIDTH, THUMB_HEIGHT, FilterType::Triangle)
        .to_rgb8();

    let mut glow = RgbImage::from_pixel(CARD_WIDTH, CARD_HEIGHT, BACKGROUND);
    fill_rect(&mut glow, (220, 50), (1060, 500), GLOW);
    stroke_rect(&mut glow, (220, 50), (1060, 500), ACCENT);
    let mut card = imageops::fast_blur(&glow, GLOW_SIGMA);

    let left = (CARD_WIDTH - THUMB_WIDTH) / 2;
    stroke_rect(
        &mut card,
        (left - BORDER, THUMB_TOP - BORDER),
        (left + THUMB_WIDTH + BORDER, THUMB_TOP + THUMB_HEIGHT + BORDER),
        ACCENT,
    );
    imageops::replace(&mut card, &thumbnail, i64::from(left), i64::from(THUMB_TOP));

    let mut line = THUMB_TOP + THUMB_HEIGHT + 30;
    let lines = [
        (fonts.title.as_ref(), TITLE_SIZE, TITLE_COLOR, text.title.as_str()),
        (fonts.body.as_ref(), CHANNEL_SIZE, GLOW, text.channel.as_str()),
        (fonts.body.as_ref(), STATS_SIZE, ACCENT, text.stats.as_str()),
        (fonts.title.as_ref(), TITLE_SIZE, ACCENT, CALL_TO_ACTION),
    ];
    for (font, size, color, content) in lines {
        if let Some(font) = font {
            draw_centered(&mut card, font, PxScale::from(size), color, line, content);
        }
        line += LINE_SPACING;
    }

    let mut encoded = Cursor::new(Vec::new());
    card.write_to(&mut encoded, ImageFormat::Png)?;
    Ok(encoded.into_inner())
}

// Centres `content` horizontally around the canvas midline and vertically
// around `center_y`, trimming it with an ellipsis when it is too wide.
fn draw_centered(
    canvas: &mut RgbImage,
    font: &FontVec,
    scale: PxScale,
    color: Rgb<u8>,
    center_y: u32,
    content: &str,
) {
    let max_width = canvas.width().saturating_sub(2 * TEXT_MARGIN);
    let mut shown = content.to_string();
    let (mut width, mut height) = text_size(scale, font, &shown);
    let mut kept: Vec<char> = content.chars().collect();
    while width > max_width && !kept.is_empty() {
        kept.pop();
        shown = format!("{}...", kept.iter().collect::<String>().trim_end());
        (width, height) = text_size(scale, font, &shown);
    }

    let x = canvas.width().saturating_sub(width) / 2;
    let y = center_y.saturating_sub(height / 2);
    draw_text_mut(canvas, color, x as i32, y as i32, scale, font, &shown);
}

// Corners are inclusive and clipped to the canvas.
fn fill_rect(canvas: &mut RgbImage, from: (u32, u32), to: (u32, u32), color: Rgb<u8>) {
    let right = to.0.min(canvas.width() - 1);
    let bottom = to.1.min(canvas.height() - 1);
    for y in from.1..=bottom {
        for x in from.0..=right {
            canvas.put_pixel(x, y, color);
        }
    }
}

fn stroke_rect(canvas: &mut RgbImage, from: (u32, u32), to: (u32, u32), color: Rgb<u8>) {
    let inner = BORDER - 1;
    fill_rect(canvas, from, (to.0, from.1 + inner), color);
    fill_rect(canvas, (from.0, to.1 - inner), to, color);
    fill_rect(canvas, from, (from.0 + inner, to.1), color);
    fill_rect(canvas, (to.0 - inner, from.1), to, color);
}

fn is_fresh(path: &Path, now: SystemTime, max_age: Duration) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|modified| age(now, modified) < max_age)
        .unwrap_or(false)
}

fn age(now: SystemTime, then: SystemTime) -> Duration {
    now.duration_since(then).unwrap_or_default()
}

/// Deletes regular files directly inside `dir` that are older than
/// `max_age`. Returns how many were removed; failures are logged and
/// skipped.
pub fn sweep_expired(dir: &Path, max_age: Duration, now: SystemTime) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(dir = %dir.display(), error = %err, "skipping unreadable card entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let modified = match entry.metadata().map(|meta| meta.modified()) {
            Ok(Ok(modified)) => modified,
            _ => continue,
        };
        if age(now, modified) <= max_age {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(err) => {
                warn!(path = %entry.path().display(), error = %err, "failed to remove expired card")
            }
        }
    }
    removed
}

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Background task that periodically runs [`sweep_expired`] on the card
/// directory.
pub struct CardSweeper {
    dir: PathBuf,
    interval: Duration,
    max_age: Duration,
    running: Mutex<Option<Running>>,
}

impl CardSweeper {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_timing(dir, SWEEP_INTERVAL, CARD_MAX_AGE)
    }

    pub fn with_timing(dir: impl Into<PathBuf>, interval: Duration, max_age: Duration) -> Self {
        Self {
            dir: dir.into(),
            interval,
            max_age,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Spawns the sweep loop on the current runtime. Returns `false` when it
    /// is already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            return false;
        }

        let (shutdown, mut stop) = oneshot::channel();
        let dir = self.dir.clone();
        let max_age = self.max_age;
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        let dir = dir.clone();
                        let swept = tokio::task::spawn_blocking(move || {
                            sweep_expired(&dir, max_age, SystemTime::now())
                        })
                        .await;
                        match swept {
                            Ok(0) => {}
                            Ok(count) => info!(removed = count, "swept expired share cards"),
                            Err(err) => warn!(error = %err, "card sweep task failed"),
                        }
                    }
                }
            }
        });

        info!(dir = %self.dir.display(), interval = ?self.interval, "card sweeper started");
        *running = Some(Running { shutdown, task });
        true
    }

    /// Signals the loop to exit and waits for it.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(Running { shutdown, task }) = running {
            let _ = shutdown.send(());
            if let Err(err) = task.await {
                warn!(error = %err, "card sweeper ended abnormally");
            }
            info!("card sweeper stopped");
        }
    }
}
