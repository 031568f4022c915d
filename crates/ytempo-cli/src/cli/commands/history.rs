//! `ytempo history` – list recent successful conversions.

use anyhow::Result;
use ytempo_core::history::HistoryDb;

pub async fn run_history(limit: u32) -> Result<()> {
    let db = HistoryDb::open_default().await?;
    let entries = db.recent(limit).await?;
    if entries.is_empty() {
        println!("No conversions recorded yet.");
        return Ok(());
    }
    for entry in entries {
        println!("{}  {}", entry.title, entry.output_path);
    }
    Ok(())
}
