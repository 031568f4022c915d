//! `ytempo resume <id>` – move a paused job back into the queue.

use anyhow::Result;
use ytempo_core::process::default_control_socket_path;

use crate::cli::control_socket::{send_request, ControlRequest};

pub async fn run_resume(id: u64) -> Result<()> {
    let socket_path = default_control_socket_path()?;
    let reply = send_request(&socket_path, &ControlRequest::Resume { id }).await?;
    if reply.found == Some(true) {
        println!("Resumed job {id}");
    } else {
        println!("Job {id} is not paused");
    }
    Ok(())
}
