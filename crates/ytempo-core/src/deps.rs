//! External binary readiness: the extractor (yt-dlp) and transcoder (ffmpeg)
//! must be callable before any job is submitted.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Fixed paths of the two external tools. Defaults resolve via PATH.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub extractor: PathBuf,
    pub transcoder: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            extractor: PathBuf::from("yt-dlp"),
            transcoder: PathBuf::from("ffmpeg"),
        }
    }
}

/// Readiness report over both required binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepsReport {
    pub ready: bool,
    pub missing: Vec<String>,
}

/// Per-step acquisition progress surfaced during provisioning.
#[derive(Debug, Clone)]
pub struct ProvisionUpdate {
    pub step: String,
    pub percent: u8,
    pub status: String,
    pub error: Option<String>,
}

async fn probe(binary: &PathBuf, version_flag: &str) -> bool {
    Command::new(binary)
        .arg(version_flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Probes both binaries with their version flags.
pub async fn check_ready(tools: &ToolPaths) -> DepsReport {
    let mut missing = Vec::new();
    if !probe(&tools.extractor, "--version").await {
        missing.push(tools.extractor.display().to_string());
    }
    if !probe(&tools.transcoder, "-version").await {
        missing.push(tools.transcoder.display().to_string());
    }
    DepsReport {
        ready: missing.is_empty(),
        missing,
    }
}

/// Walks the missing binaries, re-probing each and reporting progress.
///
/// This build verifies and reports; it does not install. A step that stays
/// missing ends with an error carrying installation guidance.
pub async fn provision(tools: &ToolPaths, mut on_progress: impl FnMut(ProvisionUpdate)) {
    let steps: [(&PathBuf, &str, &str); 2] = [
        (&tools.extractor, "--version", "install yt-dlp (e.g. pipx install yt-dlp) and ensure it is on PATH"),
        (&tools.transcoder, "-version", "install ffmpeg from your distribution packages and ensure it is on PATH"),
    ];

    for (binary, flag, hint) in steps {
        let step = binary.display().to_string();
        on_progress(ProvisionUpdate {
            step: step.clone(),
            percent: 0,
            status: "checking".to_string(),
            error: None,
        });
        if probe(binary, flag).await {
            on_progress(ProvisionUpdate {
                step,
                percent: 100,
                status: "ready".to_string(),
                error: None,
            });
        } else {
            on_progress(ProvisionUpdate {
                step,
                percent: 100,
                status: "missing".to_string(),
                error: Some(hint.to_string()),
            });
        }
    }
}
