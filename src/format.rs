#![forbid(unsafe_code)]

//! Human-readable renderings of the raw numeric and date fields that `yt-dlp`
//! emits. None of these functions fail: malformed input degrades to a safe
//! string so a single odd field never breaks a page.

use chrono::NaiveDate;

/// Renders a duration as `MM:SS`, or `HH:MM:SS` once it reaches an hour.
pub fn format_duration(seconds: u64) -> String {
    if seconds == 0 {
        return "00:00".to_string();
    }

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let seconds = seconds % 60;

    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// Compacts view/like/play counts: `999`, `1.5K`, `1K`, `2.5M`.
pub fn format_count(count: u64) -> String {
    if count < 1_000 {
        count.to_string()
    } else if count < 1_000_000 {
        compact(count as f64 / 1_000.0, 'K')
    } else {
        compact(count as f64 / 1_000_000.0, 'M')
    }
}

fn compact(value: f64, suffix: char) -> String {
    let rendered = format!("{value:.1}");
    let trimmed = rendered.strip_suffix(".0").unwrap_or(&rendered);
    format!("{trimmed}{suffix}")
}

/// Turns `yt-dlp`'s `YYYYMMDD` upload date into `June 04, 2024`.
///
/// Anything that is not an eight digit calendar date comes back unchanged.
pub fn format_date(value: &str) -> String {
    if value.len() != 8 || !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return value.to_string();
    }

    match NaiveDate::parse_from_str(value, "%Y%m%d") {
        Ok(date) => date.format("%B %d, %Y").to_string(),
        Err(_) => value.to_string(),
    }
}
