//! `ytempo settings` – show or change the download settings file.

use anyhow::{Context, Result};

use ytempo_core::process::default_control_socket_path;
use ytempo_core::settings::{SettingsStore, SettingsUpdate};

use crate::cli::control_socket::{send_request, ControlRequest};

pub async fn run_settings(set: &[String]) -> Result<()> {
    let store = SettingsStore::open_default()?;

    let settings = if set.is_empty() {
        store.load_or_init()?
    } else {
        let mut update = SettingsUpdate::default();
        for pair in set {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("expected key=value, got: {pair}"))?;
            update.set(key.trim(), value.trim())?;
        }
        let applied = store.update(&update)?;

        // A live instance picks the change up immediately; without one the
        // next `ytempo run` reads the file anyway.
        if let Ok(socket_path) = default_control_socket_path() {
            if send_request(&socket_path, &ControlRequest::ReloadSettings)
                .await
                .is_ok()
            {
                println!("Applied to the running instance.");
            }
        }
        applied
    };

    println!("max_concurrent_downloads = {}", settings.max_concurrent_downloads);
    println!("max_retries = {}", settings.max_retries);
    println!("download_timeout_secs = {}", settings.download_timeout_secs);
    println!("bandwidth_limit_kbps = {}", settings.bandwidth_limit_kbps);
    println!("auto_retry = {}", settings.auto_retry);
    Ok(())
}
