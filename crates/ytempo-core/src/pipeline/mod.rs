//! The conversion pipeline: metadata probe, audio extraction, optional
//! tempo transcode, finalization.
//!
//! One call to [`run_attempt`] is one attempt; the retry controller re-runs
//! it on transient failures. All intermediate files use temp names distinct
//! from the final name, so a crash mid-pipeline never leaves something that
//! looks like a finished download.

mod extract;
mod filename;
mod metadata;
mod preflight;
mod progress;
mod transcode;

pub use filename::sanitize_title;
pub use metadata::{fetch_metadata, TrackInfo, METADATA_TIMEOUT};
pub use preflight::{ensure_free_space, MIN_FREE_BYTES};
pub use progress::{
    parse_download_line, parse_duration, parse_duration_line, parse_transcode_time,
    DownloadProgress,
};
pub use transcode::{tempo_chain, tempo_filter};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::deps::ToolPaths;
use crate::queue::job::{JobContext, JobId, JobOutput};

/// Working file layout for one job in its output directory.
struct WorkPaths {
    /// Extractor output template; `%(ext)s` becomes `mp3`.
    download_template: PathBuf,
    /// Concrete file the extractor produces.
    download_path: PathBuf,
    /// Transcoder output before the final rename.
    tempo_path: PathBuf,
    dir: PathBuf,
    base: String,
}

impl WorkPaths {
    fn new(dir: &Path, base: &str, id: JobId) -> Self {
        Self {
            download_template: dir.join(format!("{base}.{id}.dl.%(ext)s")),
            download_path: dir.join(format!("{base}.{id}.dl.mp3")),
            tempo_path: dir.join(format!("{base}.{id}.tempo.mp3")),
            dir: dir.to_path_buf(),
            base: base.to_string(),
        }
    }

    /// Final path for the finished file. Identical titles from other jobs
    /// (or earlier runs) are disambiguated with the job id rather than
    /// overwritten.
    fn final_path(&self, id: JobId) -> PathBuf {
        let plain = self.dir.join(format!("{}.mp3", self.base));
        if plain.exists() {
            self.dir.join(format!("{} ({id}).mp3", self.base))
        } else {
            plain
        }
    }

    /// Best-effort removal of leftover temp files; never masks the
    /// original failure.
    async fn cleanup(&self) {
        for path in [&self.download_path, &self.tempo_path] {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(path = %path.display(), "temp cleanup: {e}");
                }
            }
        }
    }
}

/// Removes any temp files a torn-down attempt left behind for this job.
/// An attempt timeout drops the pipeline future mid-stage, which skips its
/// inline cleanup; the job-id markers make leftovers identifiable.
pub async fn cleanup_job_temps(dir: &Path, id: JobId) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    let dl_marker = format!(".{id}.dl.");
    let tempo_marker = format!(".{id}.tempo.");
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.contains(&dl_marker) || name.contains(&tempo_marker) {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
    }
}

/// Runs one full pipeline attempt for the job in `ctx`.
///
/// On success the finished MP3 sits at the returned `output_path`. On any
/// failure, temp files are cleaned up before the error is surfaced.
pub async fn run_attempt(tools: &ToolPaths, ctx: &JobContext) -> Result<JobOutput> {
    preflight::ensure_free_space(&ctx.options.output_dir)?;

    let info = metadata::fetch_metadata(tools, &ctx.cancel, &ctx.source).await?;
    ctx.sink.title(&info.title);

    let base = filename::sanitize_title(&info.title);
    let work = WorkPaths::new(&ctx.options.output_dir, &base, ctx.id);

    match run_stages(tools, ctx, &info, &work).await {
        Ok(output_path) => Ok(JobOutput {
            title: info.title,
            output_path,
        }),
        Err(e) => {
            work.cleanup().await;
            Err(e)
        }
    }
}

async fn run_stages(
    tools: &ToolPaths,
    ctx: &JobContext,
    info: &TrackInfo,
    work: &WorkPaths,
) -> Result<PathBuf> {
    let two_stage = ctx.options.needs_transcode();

    extract::download_audio(
        tools,
        &ctx.cancel,
        &ctx.source,
        &ctx.options,
        &work.download_template,
        two_stage,
        &ctx.sink,
    )
    .await?;

    let produced = if two_stage {
        transcode::apply_tempo(
            tools,
            &ctx.cancel,
            &work.download_path,
            &work.tempo_path,
            &ctx.options,
            info.duration_secs,
            &ctx.sink,
        )
        .await?;
        let _ = tokio::fs::remove_file(&work.download_path).await;
        work.tempo_path.clone()
    } else {
        work.download_path.clone()
    };

    let final_path = work.final_path(ctx.id);
    tokio::fs::rename(&produced, &final_path)
        .await
        .with_context(|| format!("finalize {}", final_path.display()))?;
    tracing::info!(job = ctx.id, path = %final_path.display(), "conversion finished");
    Ok(final_path)
}
