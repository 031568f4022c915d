//! Job records, options, and the submission boundary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::retry::ClassifiedError;
use crate::settings::DownloadSettings;

use super::events::ProgressSink;

/// Job identifier. Assigned at submission, never reused after cleanup.
pub type JobId = u64;

/// Fastest speed multiplier accepted at the submission boundary.
pub const MAX_SPEED: f64 = 3.0;

/// Highest accepted rate limit in KB/s.
pub const MAX_RATE_LIMIT_KBPS: u64 = 100_000;

/// Supported MP3 bitrate tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    Kbps128,
    Kbps192,
    Kbps256,
    Kbps320,
}

impl Quality {
    pub fn from_kbps(kbps: u32) -> Option<Self> {
        match kbps {
            128 => Some(Quality::Kbps128),
            192 => Some(Quality::Kbps192),
            256 => Some(Quality::Kbps256),
            320 => Some(Quality::Kbps320),
            _ => None,
        }
    }

    pub fn kbps(self) -> u32 {
        match self {
            Quality::Kbps128 => 128,
            Quality::Kbps192 => 192,
            Quality::Kbps256 => 256,
            Quality::Kbps320 => 320,
        }
    }

    /// The extractor's ordinal audio-quality scale: 0 is best.
    pub fn extractor_ordinal(self) -> u32 {
        match self {
            Quality::Kbps320 => 0,
            Quality::Kbps256 => 1,
            Quality::Kbps192 => 2,
            Quality::Kbps128 => 3,
        }
    }
}

/// Per-job conversion options, normalized at the submission boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    pub quality: Quality,
    /// Playback speed multiplier; 1.0 skips the transcode stage.
    pub speed: f64,
    pub output_dir: PathBuf,
    /// Download rate limit in KB/s; 0 is unlimited.
    pub rate_limit_kbps: u64,
}

impl JobOptions {
    /// Whether this job needs the transcode stage.
    pub fn needs_transcode(&self) -> bool {
        (self.speed - 1.0).abs() > f64::EPSILON
    }
}

/// Lifecycle state of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Active,
    Paused,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Active => "active",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

/// One tracked conversion job. Owned exclusively by the queue actor.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub source: String,
    pub options: JobOptions,
    pub status: JobStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: i32,
    pub added_at: i64,
    pub started_at: Option<i64>,
    pub title: Option<String>,
    pub error: Option<String>,
}

/// Serializable view of a job for status snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub source: String,
    pub status: JobStatus,
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub added_at: i64,
    pub started_at: Option<i64>,
    pub title: Option<String>,
    pub error: Option<String>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            source: job.source.clone(),
            status: job.status,
            priority: job.priority,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            added_at: job.added_at,
            started_at: job.started_at,
            title: job.title.clone(),
            error: job.error.clone(),
        }
    }
}

/// Rejection from the submission boundary. Out-of-range option values are
/// not errors (they fall back to defaults); only an unusable source is.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("source URL must not be empty")]
    EmptySource,
}

/// Raw submission as received from a caller (CLI flag values, socket JSON).
///
/// Out-of-range values fall back to documented defaults rather than being
/// rejected; only an empty source is an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub source: String,
    pub quality_kbps: Option<u32>,
    pub speed: Option<f64>,
    pub rate_limit_kbps: Option<u64>,
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub priority: i32,
}

impl SubmitRequest {
    /// Validates and normalizes into concrete job options.
    ///
    /// Defaults: quality 320, speed 1.0, rate limit from the current
    /// bandwidth-limit setting, output dir from `default_dir`.
    pub fn normalize(
        &self,
        settings: &DownloadSettings,
        default_dir: &Path,
    ) -> Result<(String, JobOptions), SubmitError> {
        let source = self.source.trim();
        if source.is_empty() {
            return Err(SubmitError::EmptySource);
        }
        if url::Url::parse(source).is_err() {
            tracing::debug!(source, "submission is not an absolute URL; passing through");
        }

        let quality = self
            .quality_kbps
            .and_then(Quality::from_kbps)
            .unwrap_or(Quality::Kbps320);
        let speed = match self.speed {
            Some(s) if s > 0.0 && s <= MAX_SPEED => s,
            _ => 1.0,
        };
        let rate_limit_kbps = match self.rate_limit_kbps {
            Some(r) if r <= MAX_RATE_LIMIT_KBPS => r,
            _ => settings.bandwidth_limit_kbps,
        };
        let output_dir = self
            .output_dir
            .clone()
            .unwrap_or_else(|| default_dir.to_path_buf());

        Ok((
            source.to_string(),
            JobOptions {
                quality,
                speed,
                output_dir,
                rate_limit_kbps,
            },
        ))
    }
}

/// Resolution of a successful pipeline.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub title: String,
    pub output_path: PathBuf,
}

/// Everything a job runner needs to drive one job end to end.
pub struct JobContext {
    pub id: JobId,
    pub source: String,
    pub options: JobOptions,
    /// Retry ceiling copied from queue config at admission time.
    pub max_retries: u32,
    pub retry_delay_base: Duration,
    pub attempt_timeout: Duration,
    pub cancel: CancellationToken,
    pub sink: ProgressSink,
}

/// The pipeline-execution callback injected into the queue: a full
/// retry-wrapped download+transcode run resolving to a terminal outcome.
pub type JobRunner = Arc<
    dyn Fn(JobContext) -> Pin<Box<dyn std::future::Future<Output = Result<JobOutput, ClassifiedError>> + Send>>
        + Send
        + Sync,
>;

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DownloadSettings {
        DownloadSettings {
            bandwidth_limit_kbps: 2000,
            ..DownloadSettings::default()
        }
    }

    #[test]
    fn quality_ordinals() {
        assert_eq!(Quality::Kbps320.extractor_ordinal(), 0);
        assert_eq!(Quality::Kbps128.extractor_ordinal(), 3);
        assert_eq!(Quality::from_kbps(192), Some(Quality::Kbps192));
        assert_eq!(Quality::from_kbps(64), None);
    }

    #[test]
    fn normalize_applies_defaults() {
        let req = SubmitRequest {
            source: "https://example.com/watch?v=abc".into(),
            quality_kbps: Some(999),
            speed: Some(7.5),
            rate_limit_kbps: Some(MAX_RATE_LIMIT_KBPS + 1),
            output_dir: None,
            priority: 0,
        };
        let (source, opts) = req.normalize(&settings(), Path::new("/tmp/out")).unwrap();
        assert_eq!(source, "https://example.com/watch?v=abc");
        assert_eq!(opts.quality, Quality::Kbps320);
        assert!((opts.speed - 1.0).abs() < f64::EPSILON);
        assert_eq!(opts.rate_limit_kbps, 2000);
        assert_eq!(opts.output_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn normalize_keeps_valid_values() {
        let req = SubmitRequest {
            source: "  https://example.com/v  ".into(),
            quality_kbps: Some(192),
            speed: Some(1.5),
            rate_limit_kbps: Some(0),
            output_dir: Some(PathBuf::from("/music")),
            priority: 5,
        };
        let (source, opts) = req.normalize(&settings(), Path::new(".")).unwrap();
        assert_eq!(source, "https://example.com/v");
        assert_eq!(opts.quality, Quality::Kbps192);
        assert!((opts.speed - 1.5).abs() < f64::EPSILON);
        assert_eq!(opts.rate_limit_kbps, 0);
        assert_eq!(opts.output_dir, PathBuf::from("/music"));
    }

    #[test]
    fn normalize_rejects_empty_source() {
        let req = SubmitRequest {
            source: "   ".into(),
            ..SubmitRequest::default()
        };
        assert!(req.normalize(&settings(), Path::new(".")).is_err());
    }

    #[test]
    fn zero_and_negative_speed_fall_back() {
        for bad in [0.0, -1.0, 3.01] {
            let req = SubmitRequest {
                source: "https://example.com/v".into(),
                speed: Some(bad),
                ..SubmitRequest::default()
            };
            let (_, opts) = req.normalize(&settings(), Path::new(".")).unwrap();
            assert!((opts.speed - 1.0).abs() < f64::EPSILON, "speed {bad}");
        }
    }

    #[test]
    fn needs_transcode() {
        let mut opts = JobOptions {
            quality: Quality::Kbps320,
            speed: 1.0,
            output_dir: PathBuf::from("."),
            rate_limit_kbps: 0,
        };
        assert!(!opts.needs_transcode());
        opts.speed = 1.25;
        assert!(opts.needs_transcode());
    }
}
