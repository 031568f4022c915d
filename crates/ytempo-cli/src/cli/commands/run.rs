//! `ytempo run` – host the queue, convert URLs, serve the control socket.

use anyhow::Result;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use ytempo_core::deps::{check_ready, ToolPaths};
use ytempo_core::history::{HistoryDb, HistoryRecorder};
use ytempo_core::process::default_control_socket_path;
use ytempo_core::queue::{ProgressEvent, ProgressStatus, QueueManager};
use ytempo_core::runner::conversion_runner;
use ytempo_core::settings::SettingsStore;

use crate::cli::control_socket;
use crate::cli::ConvertOpts;

pub async fn run_queue(urls: &[String], opts: &ConvertOpts, stay: bool) -> Result<()> {
    let store = Arc::new(SettingsStore::open_default()?);
    let settings = store.load_or_init()?;
    let cfg = settings.queue_config();

    let tools = ToolPaths::default();
    let report = check_ready(&tools).await;
    if !report.ready {
        eprintln!(
            "warning: missing tools: {} (see `ytempo doctor`)",
            report.missing.join(", ")
        );
    }

    let history: Option<Arc<dyn HistoryRecorder>> = match HistoryDb::open_default().await {
        Ok(db) => Some(Arc::new(db)),
        Err(e) => {
            tracing::warn!("history disabled: {e:#}");
            None
        }
    };

    let queue = QueueManager::start(cfg, Some(conversion_runner(tools)), history);

    let default_dir = std::env::current_dir()?;
    let socket_path = default_control_socket_path()?;
    let listener = control_socket::spawn_control_listener(
        queue.clone(),
        Arc::clone(&store),
        default_dir.clone(),
        &socket_path,
    )?;
    let printer = spawn_event_printer(&queue);

    for url in urls {
        let request = opts.to_request(url);
        let (source, options) = request.normalize(&settings, &default_dir)?;
        let id = queue.submit(source, options, request.priority).await?;
        tracing::debug!(job = id, url = %url, "submitted from command line");
    }

    if stay || urls.is_empty() {
        println!("Serving; submit with `ytempo add <url>` (Ctrl-C to stop).");
        tokio::signal::ctrl_c().await?;
    } else {
        tokio::select! {
            _ = wait_drained(&queue, cfg.idle_timeout) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    queue.shutdown().await;
    listener.abort();
    printer.abort();
    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

/// Resolves once the queue has stayed idle for `linger` (so a late
/// `ytempo add` can still land before the host exits).
async fn wait_drained(queue: &QueueManager, linger: Duration) {
    let mut idle_rx = queue.idle_watch();
    loop {
        queue.wait_idle().await;
        let became_busy = tokio::time::timeout(linger, async {
            loop {
                if idle_rx.changed().await.is_err() {
                    return;
                }
                if !*idle_rx.borrow() {
                    return;
                }
            }
        })
        .await
        .is_ok();
        if !became_busy {
            break;
        }
    }
}

fn spawn_event_printer(queue: &QueueManager) -> tokio::task::JoinHandle<()> {
    let mut rx = queue.subscribe();
    tokio::spawn(async move {
        // Re-announced queue positions are only printed when they change.
        let mut positions: HashMap<u64, usize> = HashMap::new();
        loop {
            match rx.recv().await {
                Ok(ev) => print_event(&ev, &mut positions),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("event printer lagged by {skipped}");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(ev: &ProgressEvent, positions: &mut HashMap<u64, usize>) {
    match ev.status {
        ProgressStatus::Queued => {
            if let Some(pos) = ev.queue_position {
                if positions.insert(ev.id, pos) != Some(pos) {
                    println!("[{}] queued at position {}", ev.id, pos);
                }
            }
        }
        ProgressStatus::Downloading => {
            if let Some(title) = &ev.title {
                println!("[{}] {}", ev.id, title);
            } else {
                let speed = ev.speed.as_deref().unwrap_or("-");
                let eta = ev.eta.as_deref().unwrap_or("-");
                print!(
                    "\r[{}] downloading {:5.1}%  {}  ETA {}   ",
                    ev.id, ev.percent, speed, eta
                );
                let _ = std::io::stdout().flush();
            }
        }
        ProgressStatus::Converting => {
            print!("\r[{}] converting {:5.1}%                ", ev.id, ev.percent);
            let _ = std::io::stdout().flush();
        }
        ProgressStatus::Retrying => {
            println!(
                "\n[{}] retrying ({}/{})",
                ev.id,
                ev.retry_count.unwrap_or(0),
                ev.max_retries.unwrap_or(0)
            );
        }
        ProgressStatus::Completed => {
            let path = ev
                .output_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            println!("\n[{}] done: {}", ev.id, path);
        }
        ProgressStatus::Error => {
            println!(
                "\n[{}] failed: {}",
                ev.id,
                ev.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
