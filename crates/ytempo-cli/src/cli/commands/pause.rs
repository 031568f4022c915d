//! `ytempo pause <id>` – pause a queued job in a running instance.

use anyhow::Result;
use ytempo_core::process::default_control_socket_path;

use crate::cli::control_socket::{send_request, ControlRequest};

pub async fn run_pause(id: u64) -> Result<()> {
    let socket_path = default_control_socket_path()?;
    let reply = send_request(&socket_path, &ControlRequest::Pause { id }).await?;
    if reply.found == Some(true) {
        println!("Paused job {id}");
    } else {
        println!("Job {id} is not queued (only queued jobs can be paused)");
    }
    Ok(())
}
