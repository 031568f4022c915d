//! `ytempo status` – show the live queue.

use anyhow::Result;
use ytempo_core::process::default_control_socket_path;

use crate::cli::control_socket::{send_request, ControlRequest};

pub async fn run_status() -> Result<()> {
    let socket_path = default_control_socket_path()?;
    let reply = send_request(&socket_path, &ControlRequest::Status).await?;
    let Some(status) = reply.status else {
        anyhow::bail!("no status in reply");
    };

    println!(
        "{} active, {} queued, {} completed this session",
        status.active_count, status.total_queued, status.completed_count
    );
    for job in &status.jobs {
        let label = job.title.as_deref().unwrap_or(&job.source);
        let detail = match (&job.error, job.retry_count) {
            (Some(error), _) => format!("  ({error})"),
            (None, 0) => String::new(),
            (None, n) => format!("  (retried {n}/{})", job.max_retries),
        };
        println!(
            "  {:>4}  {:<9}  pri {:>3}  {}{}",
            job.id,
            job.status.as_str(),
            job.priority,
            label,
            detail
        );
    }
    Ok(())
}
