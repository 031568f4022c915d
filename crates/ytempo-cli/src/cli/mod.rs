//! CLI for the ytempo converter.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use ytempo_core::queue::SubmitRequest;

use commands::{
    run_add, run_cancel, run_cancel_all, run_doctor, run_history, run_pause, run_queue,
    run_resume, run_settings, run_status,
};

/// Top-level CLI for the ytempo converter.
#[derive(Debug, Parser)]
#[command(name = "ytempo")]
#[command(about = "ytempo: YouTube to speed-adjusted MP3 converter", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

/// Conversion options shared by `run` and `add`.
#[derive(Debug, Clone, Args)]
pub struct ConvertOpts {
    /// MP3 bitrate in kbps (128, 192, 256, or 320).
    #[arg(long)]
    pub quality: Option<u32>,

    /// Playback speed multiplier in (0, 3]; 1.0 keeps the original tempo.
    #[arg(long)]
    pub speed: Option<f64>,

    /// Download rate limit in KB/s (0 = unlimited).
    #[arg(long = "rate-limit", value_name = "KBPS")]
    pub rate_limit: Option<u64>,

    /// Output directory (defaults to the current directory).
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Queue priority; higher is served first.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i32,
}

impl ConvertOpts {
    pub fn to_request(&self, url: &str) -> SubmitRequest {
        SubmitRequest {
            source: url.to_string(),
            quality_kbps: self.quality,
            speed: self.speed,
            rate_limit_kbps: self.rate_limit,
            output_dir: self.dir.clone(),
            priority: self.priority,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Host the download queue; converts any URLs given, serves `add` via
    /// the control socket.
    Run {
        /// URLs to convert immediately.
        urls: Vec<String>,

        #[command(flatten)]
        opts: ConvertOpts,

        /// Keep serving after the queue drains (until Ctrl-C).
        #[arg(long)]
        stay: bool,
    },

    /// Submit a URL to a running `ytempo run` instance.
    Add {
        /// Video URL to convert.
        url: String,

        #[command(flatten)]
        opts: ConvertOpts,
    },

    /// Show the live queue status.
    Status,

    /// Pause a queued job by its ID.
    Pause {
        /// Job identifier.
        id: u64,
    },

    /// Resume a paused job by its ID.
    Resume {
        /// Job identifier.
        id: u64,
    },

    /// Cancel a job in any state by its ID.
    Cancel {
        /// Job identifier.
        id: u64,
    },

    /// Cancel every tracked job.
    CancelAll,

    /// Show or change download settings.
    Settings {
        /// Apply `key=value` updates (repeatable).
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// List recent successful conversions.
    History {
        /// Maximum entries to show.
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Check that the external tools are installed and callable.
    Doctor,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Run { urls, opts, stay } => run_queue(&urls, &opts, stay).await?,
            CliCommand::Add { url, opts } => run_add(&url, &opts).await?,
            CliCommand::Status => run_status().await?,
            CliCommand::Pause { id } => run_pause(id).await?,
            CliCommand::Resume { id } => run_resume(id).await?,
            CliCommand::Cancel { id } => run_cancel(id).await?,
            CliCommand::CancelAll => run_cancel_all().await?,
            CliCommand::Settings { set } => run_settings(&set).await?,
            CliCommand::History { limit } => run_history(limit).await?,
            CliCommand::Doctor => run_doctor().await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
