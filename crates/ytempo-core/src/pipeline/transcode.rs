//! Stage C: speed adjustment via the transcoder's tempo filter.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::deps::ToolPaths;
use crate::process::run_stage;
use crate::queue::events::ProgressSink;
use crate::queue::job::JobOptions;

use super::extract::DOWNLOAD_SHARE;
use super::progress::{parse_duration_line, parse_transcode_time};

/// The transcoder's per-stage tempo limits.
const TEMPO_MIN: f64 = 0.5;
const TEMPO_MAX: f64 = 2.0;

/// Decomposes a speed multiplier into tempo stages within [0.5, 2.0].
///
/// The product of the returned factors equals the request: 3.0 becomes
/// 2.0 × 1.5, 0.25 becomes 0.5 × 0.5.
pub fn tempo_chain(speed: f64) -> Vec<f64> {
    let mut factors = Vec::new();
    let mut remaining = speed;
    while remaining > TEMPO_MAX {
        factors.push(TEMPO_MAX);
        remaining /= TEMPO_MAX;
    }
    while remaining < TEMPO_MIN {
        factors.push(TEMPO_MIN);
        remaining /= TEMPO_MIN;
    }
    factors.push(remaining);
    factors
}

/// Renders the chain as an ffmpeg audio filter expression.
pub fn tempo_filter(speed: f64) -> String {
    tempo_chain(speed)
        .iter()
        .map(|f| format!("atempo={f:.6}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Re-encodes `input` into `output` at the requested tempo and bitrate.
///
/// Progress is derived from the transcoder's elapsed-time markers against
/// the source duration and mapped into the range above the download share.
/// Without a usable duration, progress reporting degrades to none.
pub async fn apply_tempo(
    tools: &ToolPaths,
    cancel: &CancellationToken,
    input: &Path,
    output: &Path,
    options: &JobOptions,
    duration_secs: Option<f64>,
    sink: &ProgressSink,
) -> Result<()> {
    let mut cmd = Command::new(&tools.transcoder);
    cmd.arg("-y")
        .arg("-i")
        .arg(input)
        .arg("-vn")
        .arg("-filter:a")
        .arg(tempo_filter(options.speed))
        .arg("-b:a")
        .arg(format!("{}k", options.quality.kbps()))
        .arg(output);

    // The extractor metadata usually knows the duration; otherwise fall
    // back to the transcoder's own Duration header.
    let mut total = duration_secs.filter(|d| *d > 0.0);
    let mut on_line = |line: &str| {
        if total.is_none() {
            total = parse_duration_line(line).filter(|d| *d > 0.0);
        }
        let (Some(total), Some(elapsed)) = (total, parse_transcode_time(line)) else {
            return;
        };
        let stage_pct = (elapsed / total * 100.0).clamp(0.0, 100.0);
        let visible = DOWNLOAD_SHARE * 100.0 + stage_pct * (1.0 - DOWNLOAD_SHARE);
        sink.converting(visible);
    };

    run_stage(
        "ffmpeg transcode",
        cmd,
        None,
        cancel,
        None,
        Some(&mut on_line),
    )
    .await
    .context("ffmpeg tempo transcode")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_chain(speed: f64) {
        let chain = tempo_chain(speed);
        let product: f64 = chain.iter().product();
        assert!(
            (product - speed).abs() < 1e-9,
            "chain {chain:?} product {product} != {speed}"
        );
        for f in &chain {
            assert!(
                (TEMPO_MIN..=TEMPO_MAX).contains(f),
                "factor {f} out of range for speed {speed}"
            );
        }
    }

    #[test]
    fn chain_within_native_range_is_single_stage() {
        assert_eq!(tempo_chain(1.5), vec![1.5]);
        assert_eq!(tempo_chain(0.5), vec![0.5]);
        assert_eq!(tempo_chain(2.0), vec![2.0]);
    }

    #[test]
    fn fast_speeds_decompose() {
        assert_chain(3.0);
        assert_chain(4.0);
        let chain = tempo_chain(4.0);
        assert_eq!(chain, vec![2.0, 2.0]);
    }

    #[test]
    fn slow_speeds_decompose() {
        assert_chain(0.25);
        assert_chain(0.3);
    }

    #[test]
    fn everyday_speeds_hold_the_invariant() {
        for speed in [0.75, 1.25, 2.5, 2.75, 3.0] {
            assert_chain(speed);
        }
    }

    #[test]
    fn filter_expression_chains_stages() {
        assert_eq!(tempo_filter(3.0), "atempo=2.000000,atempo=1.500000");
        assert_eq!(tempo_filter(1.5), "atempo=1.500000");
    }
}
