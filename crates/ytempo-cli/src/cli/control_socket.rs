//! Control socket: server (during `ytempo run`) and client (for `add`,
//! `status`, `pause`, `resume`, `cancel`).
//! Protocol: one JSON request per line, one JSON reply per line.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use ytempo_core::queue::{JobId, QueueManager, QueueStatus, SubmitRequest};
use ytempo_core::settings::SettingsStore;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlRequest {
    Submit { request: SubmitRequest },
    Cancel { id: JobId },
    CancelAll,
    Pause { id: JobId },
    Resume { id: JobId },
    Status,
    ReloadSettings,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ControlReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<QueueStatus>,
}

impl ControlReply {
    fn ok() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Spawns a task serving control requests against the live queue.
pub fn spawn_control_listener(
    queue: QueueManager,
    settings: Arc<SettingsStore>,
    default_dir: PathBuf,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    let _ = std::fs::remove_file(&path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("bind control socket {}", path.display()))?;
    tracing::debug!(path = %path.display(), "control socket listening");

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let queue = queue.clone();
                    let settings = Arc::clone(&settings);
                    let default_dir = default_dir.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, queue, settings, default_dir).await
                        {
                            tracing::debug!("control connection: {e:#}");
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve_connection(
    stream: UnixStream,
    queue: QueueManager,
    settings: Arc<SettingsStore>,
    default_dir: PathBuf,
) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        let reply = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => handle_request(request, &queue, &settings, &default_dir).await,
            Err(e) => ControlReply::err(format!("malformed request: {e}")),
        };
        let mut out = serde_json::to_string(&reply)?;
        out.push('\n');
        write.write_all(out.as_bytes()).await?;
    }
    Ok(())
}

async fn handle_request(
    request: ControlRequest,
    queue: &QueueManager,
    settings: &SettingsStore,
    default_dir: &Path,
) -> ControlReply {
    match request {
        ControlRequest::Submit { request } => {
            let current = match settings.load_or_init() {
                Ok(s) => s,
                Err(e) => return ControlReply::err(format!("load settings: {e:#}")),
            };
            match request.normalize(&current, default_dir) {
                Ok((source, options)) => match queue.submit(source, options, request.priority).await
                {
                    Ok(id) => {
                        let mut reply = ControlReply::ok();
                        reply.id = Some(id);
                        reply
                    }
                    Err(e) => ControlReply::err(format!("{e:#}")),
                },
                Err(e) => ControlReply::err(format!("{e:#}")),
            }
        }
        ControlRequest::Cancel { id } => {
            let mut reply = ControlReply::ok();
            reply.found = Some(queue.cancel(id).await);
            reply
        }
        ControlRequest::CancelAll => {
            let mut reply = ControlReply::ok();
            reply.removed = Some(queue.cancel_all().await);
            reply
        }
        ControlRequest::Pause { id } => {
            let mut reply = ControlReply::ok();
            reply.found = Some(queue.pause(id).await);
            reply
        }
        ControlRequest::Resume { id } => {
            let mut reply = ControlReply::ok();
            reply.found = Some(queue.resume(id).await);
            reply
        }
        ControlRequest::Status => {
            let mut reply = ControlReply::ok();
            reply.status = Some(queue.status().await);
            reply
        }
        ControlRequest::ReloadSettings => match settings.load_or_init() {
            Ok(s) => {
                queue.reconfigure(s.queue_config());
                ControlReply::ok()
            }
            Err(e) => ControlReply::err(format!("load settings: {e:#}")),
        },
    }
}

/// Sends one request to a running `ytempo run` instance.
pub async fn send_request(socket_path: &Path, request: &ControlRequest) -> Result<ControlReply> {
    let stream = UnixStream::connect(socket_path).await.with_context(|| {
        format!(
            "no running ytempo instance at {} (start one with `ytempo run`)",
            socket_path.display()
        )
    })?;
    let (read, mut write) = stream.into_split();

    let mut msg = serde_json::to_string(request)?;
    msg.push('\n');
    write.write_all(msg.as_bytes()).await?;

    let mut lines = BufReader::new(read).lines();
    let line = lines
        .next_line()
        .await?
        .context("connection closed before reply")?;
    let reply: ControlReply = serde_json::from_str(&line).context("parse control reply")?;
    Ok(reply)
}
