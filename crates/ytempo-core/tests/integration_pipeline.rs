//! End-to-end queue test against fake extractor/transcoder binaries.
//!
//! Shell stand-ins mimic yt-dlp's metadata/extraction modes and ffmpeg's
//! time markers, so the full pipeline (metadata, extraction, transcode,
//! finalize, history) runs without touching the network.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ytempo_core::deps::ToolPaths;
use ytempo_core::history::{HistoryEntry, HistoryRecorder};
use ytempo_core::queue::{
    JobOptions, ProgressStatus, Quality, QueueConfig, QueueManager,
};
use ytempo_core::runner::conversion_runner;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

const FAKE_EXTRACTOR: &str = r#"#!/bin/sh
if [ "$1" = "-J" ]; then
    echo '{"title": "Test Tone", "duration": 10}'
    exit 0
fi
out=""
prev=""
for a in "$@"; do
    if [ "$prev" = "-o" ]; then out="$a"; fi
    prev="$a"
done
out=$(printf '%s' "$out" | sed 's/%(ext)s/mp3/')
echo "[download]  25.0% of 1.00MiB at 1.00MiB/s ETA 00:03"
echo "[download] 100.0% of 1.00MiB at 1.00MiB/s ETA 00:00"
printf 'fake audio' > "$out"
exit 0
"#;

const FAILING_EXTRACTOR: &str = r#"#!/bin/sh
if [ "$1" = "-J" ]; then
    echo "ERROR: Private video. Sign in if you've been granted access" >&2
    exit 1
fi
exit 1
"#;

const FAKE_TRANSCODER: &str = r#"#!/bin/sh
in=""
prev=""
out=""
for a in "$@"; do
    if [ "$prev" = "-i" ]; then in="$a"; fi
    prev="$a"
    out="$a"
done
echo "size=  10kB time=00:00:05.00 bitrate= 8.2kbits/s speed=20x" >&2
cp "$in" "$out"
exit 0
"#;

struct RecordingHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

#[async_trait]
impl HistoryRecorder for RecordingHistory {
    async fn record(&self, entry: &HistoryEntry) -> anyhow::Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

fn test_config() -> QueueConfig {
    QueueConfig {
        max_concurrent: 2,
        max_retries: 0,
        retry_delay_base: std::time::Duration::from_millis(10),
        download_timeout: std::time::Duration::from_secs(30),
        idle_timeout: std::time::Duration::from_secs(60),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn converts_with_speed_adjustment() {
    let tmp = tempfile::tempdir().unwrap();
    let out_dir = tmp.path().join("out");
    let tools = ToolPaths {
        extractor: write_script(tmp.path(), "fake-yt-dlp", FAKE_EXTRACTOR),
        transcoder: write_script(tmp.path(), "fake-ffmpeg", FAKE_TRANSCODER),
    };
    let history = Arc::new(RecordingHistory {
        entries: Mutex::new(Vec::new()),
    });

    let queue = QueueManager::start(
        test_config(),
        Some(conversion_runner(tools)),
        Some(history.clone()),
    );
    let mut events = queue.subscribe();

    let options = JobOptions {
        quality: Quality::Kbps192,
        speed: 1.5,
        output_dir: out_dir.clone(),
        rate_limit_kbps: 0,
    };
    let id = queue
        .submit("https://example.com/watch?v=test".into(), options, 0)
        .await
        .unwrap();
    queue.wait_idle().await;

    let final_path = out_dir.join("Test Tone.mp3");
    assert!(final_path.is_file(), "missing {}", final_path.display());
    // Temp files were cleaned up along the way.
    let leftovers: Vec<_> = std::fs::read_dir(&out_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .filter(|n| n != "Test Tone.mp3")
        .collect();
    assert!(leftovers.is_empty(), "leftover temp files: {leftovers:?}");

    let recorded = history.entries.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].job_id, id);
    assert_eq!(recorded[0].title, "Test Tone");
    assert!(recorded[0].output_path.ends_with("Test Tone.mp3"));
    drop(recorded);

    let mut saw_title = false;
    let mut saw_compressed_download = false;
    let mut saw_converting = false;
    let mut saw_completed = false;
    while let Ok(ev) = events.try_recv() {
        match ev.status {
            ProgressStatus::Downloading => {
                if ev.title.as_deref() == Some("Test Tone") {
                    saw_title = true;
                }
                // Download progress stays inside its 70% share.
                assert!(ev.percent <= 70.0 + 1e-9, "download at {}", ev.percent);
                if (ev.percent - 70.0).abs() < 1e-6 {
                    saw_compressed_download = true;
                }
            }
            ProgressStatus::Converting => {
                assert!(ev.percent >= 70.0, "converting at {}", ev.percent);
                saw_converting = true;
            }
            ProgressStatus::Completed => saw_completed = true,
            _ => {}
        }
    }
    assert!(saw_title);
    assert!(saw_compressed_download);
    assert!(saw_converting);
    assert!(saw_completed);
}

#[tokio::test(flavor = "multi_thread")]
async fn normal_speed_skips_the_transcoder() {
    let tmp = tempfile::tempdir().unwrap();
    let out_dir = tmp.path().join("out");
    let tools = ToolPaths {
        extractor: write_script(tmp.path(), "fake-yt-dlp", FAKE_EXTRACTOR),
        // A transcoder that explodes if invoked.
        transcoder: write_script(tmp.path(), "fake-ffmpeg", "#!/bin/sh\nexit 9\n"),
    };

    let queue = QueueManager::start(test_config(), Some(conversion_runner(tools)), None);
    let options = JobOptions {
        quality: Quality::Kbps320,
        speed: 1.0,
        output_dir: out_dir.clone(),
        rate_limit_kbps: 0,
    };
    queue
        .submit("https://example.com/watch?v=test".into(), options, 0)
        .await
        .unwrap();
    queue.wait_idle().await;

    assert!(out_dir.join("Test Tone.mp3").is_file());
    assert_eq!(queue.status().await.completed_count, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn private_video_fails_with_classified_message() {
    let tmp = tempfile::tempdir().unwrap();
    let out_dir = tmp.path().join("out");
    let tools = ToolPaths {
        extractor: write_script(tmp.path(), "fake-yt-dlp", FAILING_EXTRACTOR),
        transcoder: write_script(tmp.path(), "fake-ffmpeg", FAKE_TRANSCODER),
    };

    let queue = QueueManager::start(test_config(), Some(conversion_runner(tools)), None);
    let mut events = queue.subscribe();
    let options = JobOptions {
        quality: Quality::Kbps320,
        speed: 1.0,
        output_dir: out_dir,
        rate_limit_kbps: 0,
    };
    let id = queue
        .submit("https://example.com/watch?v=private".into(), options, 0)
        .await
        .unwrap();
    queue.wait_idle().await;

    let mut error_message = None;
    while let Ok(ev) = events.try_recv() {
        if ev.id == id && ev.status == ProgressStatus::Error {
            error_message = ev.error.clone();
        }
    }
    assert_eq!(error_message.as_deref(), Some("This video is private"));
}
