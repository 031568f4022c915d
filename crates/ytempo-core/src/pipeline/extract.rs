//! Stage B: audio extraction/download via the extractor binary.

use anyhow::Result;
use std::path::Path;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::deps::ToolPaths;
use crate::process::run_stage;
use crate::queue::events::ProgressSink;
use crate::queue::job::JobOptions;

use super::progress::parse_download_line;

/// Share of the visible progress range taken by the download when a
/// transcode stage follows. The remainder belongs to the transcode, keeping
/// user-visible progress monotonic across the two-stage pipeline.
pub(super) const DOWNLOAD_SHARE: f64 = 0.70;

/// Runs the extractor in audio-extraction mode, writing to `template`
/// (an output template whose `%(ext)s` the extractor fills in).
///
/// Every recognized percent on stdout is forwarded through the sink,
/// compressed into the download share of the range when `two_stage`.
pub async fn download_audio(
    tools: &ToolPaths,
    cancel: &CancellationToken,
    source: &str,
    options: &JobOptions,
    template: &Path,
    two_stage: bool,
    sink: &ProgressSink,
) -> Result<()> {
    let mut cmd = Command::new(&tools.extractor);
    cmd.arg("-x")
        .arg("--audio-format")
        .arg("mp3")
        .arg("--audio-quality")
        .arg(options.quality.extractor_ordinal().to_string())
        .arg("--newline")
        .arg("--no-playlist")
        .arg("-o")
        .arg(template);
    if options.rate_limit_kbps > 0 {
        cmd.arg("--limit-rate")
            .arg(format!("{}K", options.rate_limit_kbps));
    }
    cmd.arg("--").arg(source);

    let mut on_line = |line: &str| {
        if let Some(p) = parse_download_line(line) {
            let visible = if two_stage {
                p.percent * DOWNLOAD_SHARE
            } else {
                p.percent
            };
            sink.downloading(visible, p.speed, p.eta);
        }
    };

    run_stage(
        "audio extraction",
        cmd,
        None,
        cancel,
        Some(&mut on_line),
        None,
    )
    .await?;
    Ok(())
}
