//! Subprocess supervision: per-job cancellation registry, stage execution
//! with output streaming, and the one-shot settlement latch.
//!
//! Each admitted job is registered here with a cancellation token. Whichever
//! external process is running for that job at cancel time is killed with a
//! forceful signal; graceful termination is not relied on anywhere.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::queue::JobId;

/// Cap on retained stderr so a chatty subprocess cannot balloon memory.
pub const STDERR_CAP: usize = 10_000;

/// Cap on retained stdout. Metadata JSON for long videos easily exceeds the
/// stderr cap, so this is far larger.
const STDOUT_CAP: usize = 8 * 1024 * 1024;

/// Shared registry of job id -> cancellation token.
///
/// The queue registers a job at admission and deregisters it on settlement;
/// every pipeline stage for that job observes the same token.
#[derive(Default)]
pub struct ProcessRegistry {
    jobs: Mutex<HashMap<JobId, CancellationToken>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job; returns the token its pipeline stages run under.
    pub fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.jobs
            .lock()
            .unwrap()
            .insert(job_id, token.clone());
        token
    }

    /// Unregister a job (call on settlement, success or failure).
    pub fn deregister(&self, job_id: JobId) {
        self.jobs
            .lock()
            .unwrap()
            .remove(&job_id);
    }

    /// Request cancellation: the currently running stage's process is killed.
    pub fn request_cancel(&self, job_id: JobId) {
        if let Some(token) = self
            .jobs
            .lock()
            .unwrap()
            .get(&job_id)
        {
            token.cancel();
        }
    }

    /// Number of jobs currently registered.
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One-shot latch guarding terminal resolution of a job attempt.
///
/// Process close and error signals can race; whichever path claims the latch
/// first performs the terminal resolution, every later claim is a no-op.
#[derive(Debug, Default, Clone)]
pub struct SettleOnce {
    settled: Arc<AtomicBool>,
}

impl SettleOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true exactly once.
    pub fn claim(&self) -> bool {
        !self.settled.swap(true, Ordering::SeqCst)
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }
}

/// Captured output of a finished stage.
#[derive(Debug)]
pub struct StageOutput {
    pub stdout: String,
    pub stderr: String,
}

fn push_capped(buf: &mut String, line: &str, cap: usize) {
    if buf.len() >= cap {
        return;
    }
    let room = cap - buf.len();
    if !buf.is_empty() {
        buf.push('\n');
    }
    buf.extend(line.chars().take(room));
}

/// Runs one external pipeline stage to completion.
///
/// Both output streams are read line by line; `on_stdout`/`on_stderr` see
/// each line as it arrives (progress parsing), and capped transcripts are
/// returned for diagnostics. The process is killed forcefully when `cancel`
/// fires or `timeout` elapses, and on a non-zero exit the captured stderr
/// tail becomes the failure reason.
pub async fn run_stage(
    name: &str,
    mut cmd: Command,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    mut on_stdout: Option<&mut (dyn FnMut(&str) + Send)>,
    mut on_stderr: Option<&mut (dyn FnMut(&str) + Send)>,
) -> Result<StageOutput> {
    cmd.stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().with_context(|| format!("spawn {name}"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("{name}: no stdout pipe"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("{name}: no stderr pipe"))?;
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();

    let deadline = async {
        match timeout {
            Some(t) => tokio::time::sleep(t).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut stdout_buf = String::new();
    let mut stderr_buf = String::new();
    let mut out_done = false;
    let mut err_done = false;

    while !(out_done && err_done) {
        tokio::select! {
            line = out_lines.next_line(), if !out_done => match line {
                Ok(Some(l)) => {
                    push_capped(&mut stdout_buf, &l, STDOUT_CAP);
                    if let Some(cb) = on_stdout.as_deref_mut() {
                        cb(&l);
                    }
                }
                Ok(None) => out_done = true,
                Err(e) => {
                    tracing::debug!("{name}: stdout read: {e}");
                    out_done = true;
                }
            },
            line = err_lines.next_line(), if !err_done => match line {
                Ok(Some(l)) => {
                    push_capped(&mut stderr_buf, &l, STDERR_CAP);
                    if let Some(cb) = on_stderr.as_deref_mut() {
                        cb(&l);
                    }
                }
                Ok(None) => err_done = true,
                Err(e) => {
                    tracing::debug!("{name}: stderr read: {e}");
                    err_done = true;
                }
            },
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                anyhow::bail!("{name} cancelled by user");
            }
            _ = &mut deadline => {
                let _ = child.start_kill();
                anyhow::bail!("{name} timed out");
            }
        }
    }

    let status = tokio::select! {
        status = child.wait() => status.with_context(|| format!("wait for {name}"))?,
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            anyhow::bail!("{name} cancelled by user");
        }
        _ = &mut deadline => {
            let _ = child.start_kill();
            anyhow::bail!("{name} timed out");
        }
    };

    if !status.success() {
        let tail = stderr_buf.trim();
        if tail.is_empty() {
            anyhow::bail!("{name} exited with {status}");
        }
        anyhow::bail!("{name} exited with {status}: {tail}");
    }

    Ok(StageOutput {
        stdout: stdout_buf,
        stderr: stderr_buf,
    })
}

/// Default path for the control socket (XDG state dir).
pub fn default_control_socket_path() -> std::io::Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("ytempo")?.get_state_home();
    Ok(dir.join("control.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settle_once_claims_exactly_once() {
        let latch = SettleOnce::new();
        assert!(!latch.is_settled());
        assert!(latch.claim());
        assert!(!latch.claim());
        assert!(!latch.claim());
        assert!(latch.is_settled());
    }

    #[test]
    fn registry_register_and_cancel() {
        let reg = ProcessRegistry::new();
        let token = reg.register(1);
        assert_eq!(reg.len(), 1);
        assert!(!token.is_cancelled());
        reg.request_cancel(1);
        assert!(token.is_cancelled());
        reg.deregister(1);
        assert!(reg.is_empty());
        // Cancelling an unknown id is a no-op.
        reg.request_cancel(99);
    }

    #[test]
    fn push_capped_truncates() {
        let mut buf = String::new();
        push_capped(&mut buf, "hello", 3);
        assert_eq!(buf, "hel");
        push_capped(&mut buf, "more", 3);
        assert_eq!(buf, "hel");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stage_captures_output_and_exit() {
        let cancel = CancellationToken::new();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err >&2");
        let mut seen = Vec::new();
        let out = run_stage(
            "echo",
            cmd,
            Some(Duration::from_secs(5)),
            &cancel,
            Some(&mut |l: &str| seen.push(l.to_string())),
            None,
        )
        .await
        .unwrap();
        assert_eq!(out.stdout, "out");
        assert_eq!(out.stderr, "err");
        assert_eq!(seen, vec!["out".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stage_failure_surfaces_stderr() {
        let cancel = CancellationToken::new();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo boom >&2; exit 3");
        let err = run_stage("fail", cmd, None, &cancel, None, None)
            .await
            .unwrap_err();
        let text = format!("{err:#}");
        assert!(text.contains("boom"), "missing stderr in {text}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stage_timeout_kills_process() {
        let cancel = CancellationToken::new();
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let err = run_stage(
            "sleep",
            cmd,
            Some(Duration::from_millis(100)),
            &cancel,
            None,
            None,
        )
        .await
        .unwrap_err();
        assert!(format!("{err}").contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stage_cancel_kills_process() {
        let cancel = CancellationToken::new();
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let err = run_stage("sleep", cmd, None, &cancel, None, None)
            .await
            .unwrap_err();
        assert!(format!("{err}").contains("cancelled"));
    }
}
