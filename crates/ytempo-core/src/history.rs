//! SQLite-backed history of finished conversions.
//!
//! The queue records one row per successful job; the CLI lists recent rows.
//! Live job state never touches this database.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::queue::JobId;

/// One finished conversion.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub job_id: JobId,
    pub source: String,
    pub title: String,
    pub output_path: String,
}

/// Recorder seam: the queue only needs `record`, so tests can substitute
/// an in-memory implementation.
#[async_trait]
pub trait HistoryRecorder: Send + Sync {
    async fn record(&self, entry: &HistoryEntry) -> Result<()>;
}

/// Percent-encode a path for a sqlite:// URI so spaces and special chars
/// don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the history database under the XDG state directory.
#[derive(Clone)]
pub struct HistoryDb {
    pool: Pool<Sqlite>,
}

impl HistoryDb {
    /// Open (or create) the default history database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("ytempo")?;
        let state_dir = xdg_dirs.get_state_home().join("ytempo");
        let db_path = state_dir.join("history.db");

        tokio::fs::create_dir_all(&state_dir).await?;

        let uri = path_to_sqlite_uri(&db_path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&uri)
            .await?;

        let db = HistoryDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Open (or create) the database at a specific path (tests).
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&uri)
            .await?;
        let db = HistoryDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL,
                source TEXT NOT NULL,
                title TEXT NOT NULL,
                output_path TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent entries, newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, source, title, output_path
            FROM history
            ORDER BY created_at DESC, id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let job_id: i64 = row.get("job_id");
            out.push(HistoryEntry {
                job_id: job_id as JobId,
                source: row.get("source"),
                title: row.get("title"),
                output_path: row.get("output_path"),
            });
        }
        Ok(out)
    }

    /// Number of recorded conversions.
    pub async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM history")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }
}

#[async_trait]
impl HistoryRecorder for HistoryDb {
    async fn record(&self, entry: &HistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO history (job_id, source, title, output_path, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(entry.job_id as i64)
        .bind(&entry.source)
        .bind(&entry.title)
        .bind(&entry.output_path)
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Current time as Unix seconds for DB timestamps.
pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
async fn open_memory() -> Result<HistoryDb> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let db = HistoryDb { pool };
    db.migrate().await?;
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(job_id: JobId, title: &str) -> HistoryEntry {
        HistoryEntry {
            job_id,
            source: format!("https://example.com/{job_id}"),
            title: title.to_string(),
            output_path: format!("/music/{title}.mp3"),
        }
    }

    #[tokio::test]
    async fn record_and_list() {
        let db = open_memory().await.unwrap();
        db.record(&entry(1, "first")).await.unwrap();
        db.record(&entry(2, "second")).await.unwrap();

        assert_eq!(db.count().await.unwrap(), 2);
        let recent = db.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().any(|e| e.title == "first"));
        assert!(recent.iter().any(|e| e.title == "second"));
    }

    #[tokio::test]
    async fn recent_respects_limit() {
        let db = open_memory().await.unwrap();
        for i in 0..5 {
            db.record(&entry(i, &format!("t{i}"))).await.unwrap();
        }
        assert_eq!(db.recent(2).await.unwrap().len(), 2);
    }
}
