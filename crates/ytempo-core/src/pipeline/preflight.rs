//! Pre-flight checks before a download is allowed to start.

use anyhow::{Context, Result};
use std::path::Path;

/// Minimum free space on the destination volume before a download starts.
pub const MIN_FREE_BYTES: u64 = 500 * 1024 * 1024;

/// Ensures the output directory exists and its volume has at least
/// `MIN_FREE_BYTES` available. A full volume fails the job immediately and
/// terminally instead of starting a download doomed to fill the disk.
pub fn ensure_free_space(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create output directory {}", dir.display()))?;

    match free_bytes(dir) {
        Some(free) if free < MIN_FREE_BYTES => {
            anyhow::bail!(
                "insufficient disk space in {}: {} MiB free, {} MiB required",
                dir.display(),
                free / (1024 * 1024),
                MIN_FREE_BYTES / (1024 * 1024)
            );
        }
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn free_bytes(dir: &Path) -> Option<u64> {
    use std::os::unix::ffi::OsStrExt;

    let path = std::ffi::CString::new(dir.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    Some(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(unix))]
fn free_bytes(_dir: &Path) -> Option<u64> {
    // No portable statvfs equivalent here; skip the check rather than block.
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b");
        ensure_free_space(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn reports_free_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(free_bytes(tmp.path()).is_some());
    }
}
