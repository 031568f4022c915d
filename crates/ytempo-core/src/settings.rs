//! Persisted user settings, loaded from `~/.config/ytempo/settings.toml`.
//!
//! Every write path re-clamps values into their documented ranges, so a
//! hand-edited file or an out-of-range update can never push the queue past
//! its limits.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::queue::QueueConfig;

/// Allowed ranges for each setting.
pub const MAX_CONCURRENT_RANGE: (u32, u32) = (1, 5);
pub const MAX_RETRIES_RANGE: (u32, u32) = (0, 10);
pub const DOWNLOAD_TIMEOUT_RANGE_SECS: (u64, u64) = (60, 600);
pub const BANDWIDTH_LIMIT_RANGE_KBPS: (u64, u64) = (0, 100_000);

/// Backoff base is not user-facing; it only scales with retries.
const RETRY_DELAY_BASE: Duration = Duration::from_millis(1000);

/// How long `ytempo run` lingers once the queue drains.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// User-tunable download settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Concurrent downloads, 1–5.
    pub max_concurrent_downloads: u32,
    /// Retries per job after the first attempt, 0–10.
    pub max_retries: u32,
    /// Overall per-attempt timeout in seconds, 60–600.
    pub download_timeout_secs: u64,
    /// Default download rate limit in KB/s, 0–100000 (0 = unlimited).
    pub bandwidth_limit_kbps: u64,
    /// When false, failed jobs are never retried.
    pub auto_retry: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 2,
            max_retries: 3,
            download_timeout_secs: 300,
            bandwidth_limit_kbps: 0,
            auto_retry: true,
        }
    }
}

fn clamp_u32(v: u32, (lo, hi): (u32, u32)) -> u32 {
    v.clamp(lo, hi)
}

fn clamp_u64(v: u64, (lo, hi): (u64, u64)) -> u64 {
    v.clamp(lo, hi)
}

impl DownloadSettings {
    /// Returns a copy with every field forced into range.
    pub fn clamped(mut self) -> Self {
        self.max_concurrent_downloads =
            clamp_u32(self.max_concurrent_downloads, MAX_CONCURRENT_RANGE);
        self.max_retries = clamp_u32(self.max_retries, MAX_RETRIES_RANGE);
        self.download_timeout_secs =
            clamp_u64(self.download_timeout_secs, DOWNLOAD_TIMEOUT_RANGE_SECS);
        self.bandwidth_limit_kbps =
            clamp_u64(self.bandwidth_limit_kbps, BANDWIDTH_LIMIT_RANGE_KBPS);
        self
    }

    /// Applies a partial update, then clamps.
    pub fn apply(&self, update: &SettingsUpdate) -> Self {
        let mut next = self.clone();
        if let Some(v) = update.max_concurrent_downloads {
            next.max_concurrent_downloads = v;
        }
        if let Some(v) = update.max_retries {
            next.max_retries = v;
        }
        if let Some(v) = update.download_timeout_secs {
            next.download_timeout_secs = v;
        }
        if let Some(v) = update.bandwidth_limit_kbps {
            next.bandwidth_limit_kbps = v;
        }
        if let Some(v) = update.auto_retry {
            next.auto_retry = v;
        }
        next.clamped()
    }

    /// The live queue configuration these settings imply.
    /// `auto_retry = false` zeroes the retry budget.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_concurrent: self.max_concurrent_downloads as usize,
            max_retries: if self.auto_retry { self.max_retries } else { 0 },
            retry_delay_base: RETRY_DELAY_BASE,
            download_timeout: Duration::from_secs(self.download_timeout_secs),
            idle_timeout: IDLE_TIMEOUT,
        }
    }
}

/// Partial settings change, e.g. from `ytempo settings --set k=v`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub max_concurrent_downloads: Option<u32>,
    pub max_retries: Option<u32>,
    pub download_timeout_secs: Option<u64>,
    pub bandwidth_limit_kbps: Option<u64>,
    pub auto_retry: Option<bool>,
}

impl SettingsUpdate {
    /// Parses one `key=value` pair into an update field.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "max_concurrent_downloads" => {
                self.max_concurrent_downloads = Some(value.parse()?);
            }
            "max_retries" => self.max_retries = Some(value.parse()?),
            "download_timeout_secs" => self.download_timeout_secs = Some(value.parse()?),
            "bandwidth_limit_kbps" => self.bandwidth_limit_kbps = Some(value.parse()?),
            "auto_retry" => self.auto_retry = Some(value.parse()?),
            other => anyhow::bail!("unknown setting: {other}"),
        }
        Ok(())
    }
}

/// TOML-backed settings store.
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Store at the default XDG config location.
    pub fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("ytempo")?;
        Ok(Self {
            path: xdg_dirs.place_config_file("settings.toml")?,
        })
    }

    /// Store at a specific path (tests).
    pub fn open_at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load settings, creating a default file if none exists. Values read
    /// from disk are clamped before use.
    pub fn load_or_init(&self) -> Result<DownloadSettings> {
        if !self.path.exists() {
            let defaults = DownloadSettings::default();
            self.write(&defaults)?;
            tracing::info!("created default settings at {}", self.path.display());
            return Ok(defaults);
        }
        let data = fs::read_to_string(&self.path)?;
        let settings: DownloadSettings = toml::from_str(&data)?;
        Ok(settings.clamped())
    }

    /// Applies a partial update and persists the clamped result.
    pub fn update(&self, update: &SettingsUpdate) -> Result<DownloadSettings> {
        let next = self.load_or_init()?.apply(update);
        self.write(&next)?;
        Ok(next)
    }

    fn write(&self, settings: &DownloadSettings) -> Result<()> {
        let toml = toml::to_string_pretty(settings)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, toml)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_in_range() {
        let s = DownloadSettings::default();
        assert_eq!(s.clamped(), DownloadSettings::default());
    }

    #[test]
    fn clamping_forces_ranges() {
        let s = DownloadSettings {
            max_concurrent_downloads: 99,
            max_retries: 50,
            download_timeout_secs: 5,
            bandwidth_limit_kbps: 1_000_000,
            auto_retry: true,
        }
        .clamped();
        assert_eq!(s.max_concurrent_downloads, 5);
        assert_eq!(s.max_retries, 10);
        assert_eq!(s.download_timeout_secs, 60);
        assert_eq!(s.bandwidth_limit_kbps, 100_000);
    }

    #[test]
    fn apply_merges_partial_updates() {
        let mut update = SettingsUpdate::default();
        update.set("max_concurrent_downloads", "99").unwrap();
        update.set("auto_retry", "false").unwrap();
        let s = DownloadSettings::default().apply(&update);
        assert_eq!(s.max_concurrent_downloads, 5);
        assert!(!s.auto_retry);
        assert_eq!(s.max_retries, DownloadSettings::default().max_retries);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let mut update = SettingsUpdate::default();
        assert!(update.set("nope", "1").is_err());
    }

    #[test]
    fn auto_retry_off_zeroes_queue_retries() {
        let mut s = DownloadSettings::default();
        s.max_retries = 5;
        s.auto_retry = false;
        assert_eq!(s.queue_config().max_retries, 0);
        s.auto_retry = true;
        assert_eq!(s.queue_config().max_retries, 5);
    }

    #[test]
    fn store_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SettingsStore::open_at(tmp.path().join("settings.toml"));
        let initial = store.load_or_init().unwrap();
        assert_eq!(initial, DownloadSettings::default());

        let mut update = SettingsUpdate::default();
        update.set("bandwidth_limit_kbps", "1234").unwrap();
        let updated = store.update(&update).unwrap();
        assert_eq!(updated.bandwidth_limit_kbps, 1234);
        assert_eq!(store.load_or_init().unwrap(), updated);
    }
}
