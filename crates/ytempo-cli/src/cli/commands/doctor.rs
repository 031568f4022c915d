//! `ytempo doctor` – report external tool readiness.

use anyhow::Result;
use ytempo_core::deps::{check_ready, provision, ToolPaths};

pub async fn run_doctor() -> Result<()> {
    let tools = ToolPaths::default();
    let report = check_ready(&tools).await;

    if report.ready {
        println!("All external tools are ready.");
        return Ok(());
    }

    println!("Missing tools: {}", report.missing.join(", "));
    provision(&tools, |update| {
        if let Some(error) = &update.error {
            println!("  {}: {} – {}", update.step, update.status, error);
        } else {
            println!("  {}: {} ({}%)", update.step, update.status, update.percent);
        }
    })
    .await;
    anyhow::bail!("required tools are missing");
}
