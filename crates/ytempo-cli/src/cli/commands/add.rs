//! `ytempo add <url>` – submit a job to a running instance.

use anyhow::Result;
use ytempo_core::process::default_control_socket_path;

use crate::cli::control_socket::{send_request, ControlRequest};
use crate::cli::ConvertOpts;

pub async fn run_add(url: &str, opts: &ConvertOpts) -> Result<()> {
    let socket_path = default_control_socket_path()?;
    let reply = send_request(
        &socket_path,
        &ControlRequest::Submit {
            request: opts.to_request(url),
        },
    )
    .await?;

    if let Some(error) = reply.error {
        anyhow::bail!("{error}");
    }
    match reply.id {
        Some(id) => println!("Submitted job {id} for URL: {url}"),
        None => println!("Submitted, but no job id was returned"),
    }
    Ok(())
}
