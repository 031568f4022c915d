//! Progress events and the observer channel.
//!
//! Events are transient: they are broadcast to however many subscribers are
//! listening and never stored. A lagging subscriber loses old events rather
//! than stalling the queue.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::job::{JobId, JobOutput};
use crate::retry::ClassifiedError;

/// Broadcast capacity; slow observers past this many buffered events lag.
const EVENT_CAPACITY: usize = 256;

/// Observer-facing lifecycle tag on a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Queued,
    Downloading,
    Converting,
    Retrying,
    Completed,
    Error,
}

/// One progress update for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub id: JobId,
    pub status: ProgressStatus,
    pub percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
}

impl ProgressEvent {
    fn base(id: JobId, status: ProgressStatus, percent: f64) -> Self {
        Self {
            id,
            status,
            percent,
            speed: None,
            eta: None,
            title: None,
            error: None,
            output_path: None,
            retry_count: None,
            max_retries: None,
            queue_position: None,
        }
    }

    pub fn queued(id: JobId, position: usize) -> Self {
        let mut ev = Self::base(id, ProgressStatus::Queued, 0.0);
        ev.queue_position = Some(position);
        ev
    }

    pub fn downloading(id: JobId, percent: f64) -> Self {
        Self::base(id, ProgressStatus::Downloading, percent)
    }

    pub fn converting(id: JobId, percent: f64) -> Self {
        Self::base(id, ProgressStatus::Converting, percent)
    }

    pub fn retrying(id: JobId, retry_count: u32, max_retries: u32) -> Self {
        let mut ev = Self::base(id, ProgressStatus::Retrying, 0.0);
        ev.retry_count = Some(retry_count);
        ev.max_retries = Some(max_retries);
        ev
    }

    pub fn completed(id: JobId, output: &JobOutput) -> Self {
        let mut ev = Self::base(id, ProgressStatus::Completed, 100.0);
        ev.title = Some(output.title.clone());
        ev.output_path = Some(output.output_path.clone());
        ev
    }

    pub fn failed(id: JobId, error: &ClassifiedError) -> Self {
        let mut ev = Self::base(id, ProgressStatus::Error, 0.0);
        ev.error = Some(error.user_message.clone());
        ev
    }
}

/// Internal notes flowing from pipelines back to the queue actor.
#[derive(Debug)]
pub(crate) enum JobNote {
    Title {
        id: JobId,
        title: String,
    },
    Retrying {
        id: JobId,
        retry_count: u32,
    },
    Settled {
        id: JobId,
        outcome: Result<JobOutput, ClassifiedError>,
    },
    Purge {
        id: JobId,
    },
}

/// Fan-out channel from the queue to its observers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Send ignoring the no-subscriber case; events are fire-and-forget.
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Per-job emitter handed to the pipeline.
///
/// Drops everything once the job's cancellation token fires, so a cancelled
/// pipeline cannot surface late progress to observers. Retry notices are
/// mirrored to the queue actor so the job record tracks its retry count.
#[derive(Clone)]
pub struct ProgressSink {
    id: JobId,
    bus: EventBus,
    notes: mpsc::UnboundedSender<JobNote>,
    cancel: CancellationToken,
}

impl ProgressSink {
    pub(crate) fn new(
        id: JobId,
        bus: EventBus,
        notes: mpsc::UnboundedSender<JobNote>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            bus,
            notes,
            cancel,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.bus.emit(event);
    }

    pub fn downloading(&self, percent: f64, speed: Option<String>, eta: Option<String>) {
        let mut ev = ProgressEvent::downloading(self.id, percent);
        ev.speed = speed;
        ev.eta = eta;
        self.emit(ev);
    }

    pub fn converting(&self, percent: f64) {
        self.emit(ProgressEvent::converting(self.id, percent));
    }

    pub fn title(&self, title: &str) {
        if self.cancel.is_cancelled() {
            return;
        }
        let mut ev = ProgressEvent::downloading(self.id, 0.0);
        ev.title = Some(title.to_string());
        self.bus.emit(ev);
        let _ = self.notes.send(JobNote::Title {
            id: self.id,
            title: title.to_string(),
        });
    }

    pub fn retrying(&self, retry_count: u32, max_retries: u32) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.bus
            .emit(ProgressEvent::retrying(self.id, retry_count, max_retries));
        let _ = self.notes.send(JobNote::Retrying {
            id: self.id,
            retry_count,
        });
    }
}
