//! Stage A: metadata-only probe of the source via the extractor.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::deps::ToolPaths;
use crate::process::run_stage;

/// Metadata fetch gets its own short deadline, independent of the overall
/// job timeout: a probe that hangs must not consume the download budget.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

const FALLBACK_TITLE: &str = "Untitled audio";

/// What we need from the extractor's metadata JSON.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub title: String,
    pub duration_secs: Option<f64>,
}

/// Runs the extractor in metadata-only mode and parses the single JSON
/// object it prints for the item.
pub async fn fetch_metadata(
    tools: &ToolPaths,
    cancel: &CancellationToken,
    source: &str,
) -> Result<TrackInfo> {
    let mut cmd = Command::new(&tools.extractor);
    cmd.arg("-J").arg("--no-playlist").arg("--").arg(source);

    let out = run_stage(
        "metadata fetch",
        cmd,
        Some(METADATA_TIMEOUT),
        cancel,
        None,
        None,
    )
    .await?;

    parse_metadata(&out.stdout)
}

fn parse_metadata(json: &str) -> Result<TrackInfo> {
    let value: serde_json::Value =
        serde_json::from_str(json.trim()).context("parse extractor metadata JSON")?;
    let title = value
        .get("title")
        .and_then(|t| t.as_str())
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(FALLBACK_TITLE)
        .to_string();
    let duration_secs = value.get("duration").and_then(|d| d.as_f64());
    Ok(TrackInfo {
        title,
        duration_secs,
    })
}
