//! Download queue: admission control, scheduling, and progress fan-out.
//!
//! The queue keeps all known jobs, admits at most `max_concurrent` of them
//! into supervised pipelines, and reports progress and queue positions to
//! observers. Job-table mutation is confined to a single actor task, so
//! scheduling passes never overlap.

pub mod events;
pub mod job;
mod manager;

pub use events::{EventBus, ProgressEvent, ProgressSink, ProgressStatus};
pub use job::{
    Job, JobContext, JobId, JobOptions, JobOutput, JobRunner, JobSnapshot, JobStatus, Quality,
    SubmitError, SubmitRequest,
};
pub use manager::{QueueManager, QueueStatus};

use std::time::Duration;

/// Process-wide queue tunables. Owned by the queue; changed only through
/// [`QueueManager::reconfigure`], which re-triggers scheduling.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Hard ceiling on concurrently active jobs.
    pub max_concurrent: usize,
    /// Retries per job after the first attempt.
    pub max_retries: u32,
    /// Base delay for retry backoff.
    pub retry_delay_base: Duration,
    /// Overall timeout for one pipeline attempt.
    pub download_timeout: Duration,
    /// How long a hosting process lingers once the queue drains.
    pub idle_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_retries: 3,
            retry_delay_base: Duration::from_millis(1000),
            download_timeout: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(60),
        }
    }
}
