//! `ytempo cancel <id>` / `ytempo cancel-all` – remove jobs from the queue.

use anyhow::Result;
use ytempo_core::process::default_control_socket_path;

use crate::cli::control_socket::{send_request, ControlRequest};

pub async fn run_cancel(id: u64) -> Result<()> {
    let socket_path = default_control_socket_path()?;
    let reply = send_request(&socket_path, &ControlRequest::Cancel { id }).await?;
    if reply.found == Some(true) {
        println!("Cancelled job {id}");
    } else {
        println!("No job with id {id}");
    }
    Ok(())
}

pub async fn run_cancel_all() -> Result<()> {
    let socket_path = default_control_socket_path()?;
    let reply = send_request(&socket_path, &ControlRequest::CancelAll).await?;
    println!("Cancelled {} job(s)", reply.removed.unwrap_or(0));
    Ok(())
}
