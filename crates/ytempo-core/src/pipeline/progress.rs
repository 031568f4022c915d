//! Parse extractor and transcoder output lines into progress values.
//!
//! yt-dlp's progress lines vary by version and locale, so recognition runs
//! in two tiers: a rich pattern capturing percent/speed/ETA together, and a
//! percent-only fallback. ffmpeg progress comes from `time=` markers on
//! stderr measured against the source duration.

use regex::Regex;
use std::sync::OnceLock;

/// One recognized download progress line.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub percent: f64,
    pub speed: Option<String>,
    pub eta: Option<String>,
}

fn rich_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[download\]\s+([\d.]+)%\s+of\s+~?\s*\S+\s+at\s+(\S+)\s+ETA\s+(\S+)")
            .expect("rich download pattern")
    })
}

fn percent_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([\d.]+)%").expect("percent pattern"))
}

fn time_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"time=(\d+):(\d{2}):(\d{2})(?:\.(\d+))?").expect("time pattern"))
}

/// Parses one extractor stdout line. Rich matches carry speed and ETA;
/// otherwise any percent found is forwarded alone.
pub fn parse_download_line(line: &str) -> Option<DownloadProgress> {
    if let Some(cap) = rich_pattern().captures(line) {
        let percent: f64 = cap.get(1)?.as_str().parse().ok()?;
        return Some(DownloadProgress {
            percent: percent.clamp(0.0, 100.0),
            speed: Some(cap.get(2)?.as_str().to_string()),
            eta: Some(cap.get(3)?.as_str().to_string()),
        });
    }
    let cap = percent_pattern().captures(line)?;
    let percent: f64 = cap.get(1)?.as_str().parse().ok()?;
    Some(DownloadProgress {
        percent: percent.clamp(0.0, 100.0),
        speed: None,
        eta: None,
    })
}

/// Parses a duration string in `H:MM:SS`, `M:SS`, or bare-seconds form.
/// Returns None on anything malformed; progress reporting then degrades to
/// none rather than failing the stage.
pub fn parse_duration(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let parts: Vec<&str> = s.split(':').collect();
    let to_secs = |p: &str| p.trim().parse::<f64>().ok().filter(|v| *v >= 0.0);
    match parts.as_slice() {
        [secs] => to_secs(secs),
        [m, s] => Some(to_secs(m)? * 60.0 + to_secs(s)?),
        [h, m, s] => Some(to_secs(h)? * 3600.0 + to_secs(m)? * 60.0 + to_secs(s)?),
        _ => None,
    }
}

/// Extracts the total duration from a transcoder header line like
/// `  Duration: 00:03:32.10, start: 0.000000, bitrate: 128 kb/s`.
pub fn parse_duration_line(line: &str) -> Option<f64> {
    let rest = line.trim_start().strip_prefix("Duration:")?;
    let field = rest.trim().split([',', ' ']).next()?;
    parse_duration(field)
}

/// Extracts the elapsed seconds from an ffmpeg `time=HH:MM:SS.cc` marker.
pub fn parse_transcode_time(line: &str) -> Option<f64> {
    let cap = time_pattern().captures(line)?;
    let h: f64 = cap.get(1)?.as_str().parse().ok()?;
    let m: f64 = cap.get(2)?.as_str().parse().ok()?;
    let s: f64 = cap.get(3)?.as_str().parse().ok()?;
    let frac = cap
        .get(4)
        .and_then(|f| format!("0.{}", f.as_str()).parse::<f64>().ok())
        .unwrap_or(0.0);
    Some(h * 3600.0 + m * 60.0 + s + frac)
}
