//! The queue actor: job table, admission under the concurrency bound, and
//! settlement handling.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot, watch};

use crate::history::{HistoryEntry, HistoryRecorder};
use crate::process::{ProcessRegistry, SettleOnce};
use crate::retry::{classify, ClassifiedError};

use super::events::{EventBus, JobNote, ProgressEvent, ProgressSink};
use super::job::{Job, JobContext, JobId, JobOptions, JobOutput, JobRunner, JobSnapshot, JobStatus};
use super::QueueConfig;

/// How long terminal jobs stay visible in the table before being purged.
/// Bridges the gap between an async terminal event and an observer's chance
/// to render it without retaining unbounded history.
const TERMINAL_LINGER: Duration = Duration::from_secs(5);

/// Consistent snapshot of the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub total_queued: usize,
    pub active_count: usize,
    pub completed_count: u64,
    pub jobs: Vec<JobSnapshot>,
}

enum Command {
    Submit {
        source: String,
        options: JobOptions,
        priority: i32,
        reply: oneshot::Sender<JobId>,
    },
    Cancel {
        id: JobId,
        reply: oneshot::Sender<bool>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },
    Pause {
        id: JobId,
        reply: oneshot::Sender<bool>,
    },
    Resume {
        id: JobId,
        reply: oneshot::Sender<bool>,
    },
    Reconfigure {
        config: QueueConfig,
    },
    Status {
        reply: oneshot::Sender<QueueStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running queue. Cheap to clone; all mutation goes through the
/// actor task, one message at a time.
#[derive(Clone)]
pub struct QueueManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    bus: EventBus,
    idle_rx: watch::Receiver<bool>,
}

impl QueueManager {
    /// Starts a queue actor with the given pipeline-execution callback.
    ///
    /// Without a runner the queue still schedules, but every admitted job
    /// settles immediately as a failure; the scheduler itself never crashes.
    pub fn start(
        config: QueueConfig,
        runner: Option<JobRunner>,
        history: Option<Arc<dyn HistoryRecorder>>,
    ) -> Self {
        Self::start_inner(config, runner, history).0
    }

    fn start_inner(
        config: QueueConfig,
        runner: Option<JobRunner>,
        history: Option<Arc<dyn HistoryRecorder>>,
    ) -> (Self, mpsc::UnboundedSender<JobNote>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (notes_tx, notes_rx) = mpsc::unbounded_channel();
        let (idle_tx, idle_rx) = watch::channel(true);
        let bus = EventBus::new();

        let actor = Actor {
            config,
            jobs: HashMap::new(),
            active: HashSet::new(),
            next_id: 1,
            completed_total: 0,
            runner,
            history,
            registry: Arc::new(ProcessRegistry::new()),
            bus: bus.clone(),
            notes_tx: notes_tx.clone(),
            idle_tx,
        };
        tokio::spawn(actor.run(cmd_rx, notes_rx));

        (
            Self {
                cmd_tx,
                bus,
                idle_rx,
            },
            notes_tx,
        )
    }

    /// Subscribe to the progress event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProgressEvent> {
        self.bus.subscribe()
    }

    /// Creates a queued job and returns its id immediately; the download
    /// itself runs asynchronously.
    pub async fn submit(
        &self,
        source: String,
        options: JobOptions,
        priority: i32,
    ) -> anyhow::Result<JobId> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Submit {
                source,
                options,
                priority,
                reply,
            })
            .map_err(|_| anyhow::anyhow!("queue is shut down"))?;
        rx.await.map_err(|_| anyhow::anyhow!("queue is shut down"))
    }

    /// Removes a job in any state; an active job's pipeline is torn down
    /// forcefully. Returns whether a job was found.
    pub async fn cancel(&self, id: JobId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Cancel { id, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Cancels every tracked job; returns how many were removed.
    pub async fn cancel_all(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::CancelAll { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Pauses a queued job. Returns false in any other state.
    pub async fn pause(&self, id: JobId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Pause { id, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Moves a paused job back to queued and re-triggers scheduling.
    pub async fn resume(&self, id: JobId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Resume { id, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Replaces the queue configuration. A raised concurrency ceiling admits
    /// waiting jobs without a new submission.
    pub fn reconfigure(&self, config: QueueConfig) {
        let _ = self.cmd_tx.send(Command::Reconfigure { config });
    }

    /// Consistent snapshot of all tracked jobs.
    pub async fn status(&self) -> QueueStatus {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Status { reply }).is_err() {
            return QueueStatus {
                total_queued: 0,
                active_count: 0,
                completed_count: 0,
                jobs: Vec::new(),
            };
        }
        rx.await.unwrap_or(QueueStatus {
            total_queued: 0,
            active_count: 0,
            completed_count: 0,
            jobs: Vec::new(),
        })
    }

    /// Watch channel that flips to true when no job is queued, paused, or
    /// active.
    pub fn idle_watch(&self) -> watch::Receiver<bool> {
        self.idle_rx.clone()
    }

    /// Resolves once the queue has no pending or active work.
    pub async fn wait_idle(&self) {
        let mut rx = self.idle_rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Cancels everything and stops the actor.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

struct Actor {
    config: QueueConfig,
    jobs: HashMap<JobId, Job>,
    active: HashSet<JobId>,
    next_id: JobId,
    completed_total: u64,
    runner: Option<JobRunner>,
    history: Option<Arc<dyn HistoryRecorder>>,
    registry: Arc<ProcessRegistry>,
    bus: EventBus,
    notes_tx: mpsc::UnboundedSender<JobNote>,
    idle_tx: watch::Sender<bool>,
}

impl Actor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut notes_rx: mpsc::UnboundedReceiver<JobNote>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd) {
                            break;
                        }
                    }
                    None => break,
                },
                Some(note) = notes_rx.recv() => self.handle_note(note),
            }
        }
        // Tear down whatever is still running.
        for id in self.active.iter() {
            self.registry.request_cancel(*id);
        }
    }

    /// Returns true when the actor should stop.
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Submit {
                source,
                options,
                priority,
                reply,
            } => {
                let id = self.submit(source, options, priority);
                let _ = reply.send(id);
            }
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(id));
            }
            Command::CancelAll { reply } => {
                let ids: Vec<JobId> = self.jobs.keys().copied().collect();
                let mut removed = 0;
                for id in ids {
                    if self.cancel(id) {
                        removed += 1;
                    }
                }
                let _ = reply.send(removed);
            }
            Command::Pause { id, reply } => {
                let ok = match self.jobs.get_mut(&id) {
                    Some(job) if job.status == JobStatus::Queued => {
                        job.status = JobStatus::Paused;
                        true
                    }
                    _ => false,
                };
                if ok {
                    self.emit_positions();
                    self.update_idle();
                }
                let _ = reply.send(ok);
            }
            Command::Resume { id, reply } => {
                let ok = match self.jobs.get_mut(&id) {
                    Some(job) if job.status == JobStatus::Paused => {
                        job.status = JobStatus::Queued;
                        true
                    }
                    _ => false,
                };
                if ok {
                    self.schedule();
                }
                let _ = reply.send(ok);
            }
            Command::Reconfigure { config } => {
                tracing::info!(
                    max_concurrent = config.max_concurrent,
                    max_retries = config.max_retries,
                    "queue reconfigured"
                );
                self.config = config;
                self.schedule();
            }
            Command::Status { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown { reply } => {
                let ids: Vec<JobId> = self.jobs.keys().copied().collect();
                for id in ids {
                    self.cancel(id);
                }
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    fn handle_note(&mut self, note: JobNote) {
        match note {
            JobNote::Title { id, title } => {
                if let Some(job) = self.jobs.get_mut(&id) {
                    job.title = Some(title);
                }
            }
            JobNote::Retrying { id, retry_count } => {
                if let Some(job) = self.jobs.get_mut(&id) {
                    job.retry_count = retry_count;
                }
            }
            JobNote::Settled { id, outcome } => self.settle(id, outcome),
            JobNote::Purge { id } => {
                if self
                    .jobs
                    .get(&id)
                    .map(|j| j.status.is_terminal())
                    .unwrap_or(false)
                {
                    self.jobs.remove(&id);
                }
            }
        }
    }

    fn submit(&mut self, source: String, options: JobOptions, priority: i32) -> JobId {
        let id = self.next_id;
        self.next_id += 1;
        self.jobs.insert(
            id,
            Job {
                id,
                source,
                options,
                status: JobStatus::Queued,
                retry_count: 0,
                max_retries: self.config.max_retries,
                priority,
                added_at: now_unix(),
                started_at: None,
                title: None,
                error: None,
            },
        );
        if let Some(position) = self.position_of(id) {
            self.bus.emit(ProgressEvent::queued(id, position));
        }
        tracing::info!(job = id, "job submitted");
        self.schedule();
        id
    }

    fn cancel(&mut self, id: JobId) -> bool {
        let Some(_job) = self.jobs.remove(&id) else {
            return false;
        };
        if self.active.remove(&id) {
            self.registry.request_cancel(id);
        }
        self.registry.deregister(id);
        tracing::info!(job = id, "job cancelled");
        self.schedule();
        true
    }

    /// Queued ids in admission order: priority descending, then earliest
    /// submission (ids are monotonic, so id order is submission order).
    fn queued_order(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .map(|j| j.id)
            .collect();
        ids.sort_by_key(|id| {
            let job = &self.jobs[id];
            (std::cmp::Reverse(job.priority), job.id)
        });
        ids
    }

    fn position_of(&self, id: JobId) -> Option<usize> {
        self.queued_order().iter().position(|j| *j == id).map(|p| p + 1)
    }

    /// Admits as many queued jobs as capacity allows. Launching a pipeline
    /// never blocks this loop; the actor just spawns and moves on.
    fn schedule(&mut self) {
        while self.active.len() < self.config.max_concurrent {
            let Some(id) = self.queued_order().into_iter().next() else {
                break;
            };
            self.launch(id);
        }
        self.emit_positions();
        self.update_idle();
    }

    fn launch(&mut self, id: JobId) {
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        let cancel = self.registry.register(id);
        let sink = ProgressSink::new(id, self.bus.clone(), self.notes_tx.clone(), cancel.clone());
        job.status = JobStatus::Active;
        job.started_at = Some(now_unix());
        job.max_retries = self.config.max_retries;
        self.active.insert(id);
        self.bus.emit(ProgressEvent::downloading(id, 0.0));
        tracing::info!(job = id, source = %job.source, "job admitted");

        let Some(runner) = self.runner.clone() else {
            // Infrastructure fault: fail this job only, never the scheduler.
            tracing::error!(job = id, "no pipeline runner configured");
            let _ = self.notes_tx.send(JobNote::Settled {
                id,
                outcome: Err(classify("pipeline execution is not configured")),
            });
            return;
        };

        let ctx = JobContext {
            id,
            source: job.source.clone(),
            options: job.options.clone(),
            max_retries: job.max_retries,
            retry_delay_base: self.config.retry_delay_base,
            attempt_timeout: self.config.download_timeout,
            cancel: cancel.clone(),
            sink,
        };
        let notes = self.notes_tx.clone();
        let latch = SettleOnce::new();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                outcome = runner(ctx) => outcome,
                _ = cancel.cancelled() => Err(classify("job cancelled by user")),
            };
            // Duplicate completion signals must collapse to one settlement.
            if latch.claim() {
                let _ = notes.send(JobNote::Settled { id, outcome });
            }
        });
    }

    fn settle(&mut self, id: JobId, outcome: Result<JobOutput, ClassifiedError>) {
        // Unknown id: the job was cancelled (or already settled); this
        // signal is a no-op.
        if !self.active.contains(&id) || !self.jobs.contains_key(&id) {
            return;
        }
        self.active.remove(&id);
        self.registry.deregister(id);

        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        match outcome {
            Ok(output) => {
                job.status = JobStatus::Completed;
                job.title = Some(output.title.clone());
                self.completed_total += 1;
                tracing::info!(job = id, path = %output.output_path.display(), "job completed");
                self.bus.emit(ProgressEvent::completed(id, &output));
                if let Some(history) = self.history.clone() {
                    let entry = HistoryEntry {
                        job_id: id,
                        source: job.source.clone(),
                        title: output.title.clone(),
                        output_path: output.output_path.display().to_string(),
                    };
                    tokio::spawn(async move {
                        if let Err(e) = history.record(&entry).await {
                            tracing::warn!(job = entry.job_id, "history record: {e:#}");
                        }
                    });
                }
            }
            Err(error) => {
                job.status = JobStatus::Error;
                job.error = Some(error.user_message.clone());
                tracing::warn!(job = id, kind = ?error.kind, "job failed: {}", error.user_message);
                self.bus.emit(ProgressEvent::failed(id, &error));
            }
        }

        self.spawn_purge(id);
        self.schedule();
    }

    fn spawn_purge(&self, id: JobId) {
        let notes = self.notes_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(TERMINAL_LINGER).await;
            let _ = notes.send(JobNote::Purge { id });
        });
    }

    /// Re-announces 1-based queue positions for all waiting jobs.
    fn emit_positions(&self) {
        for (idx, id) in self.queued_order().into_iter().enumerate() {
            self.bus.emit(ProgressEvent::queued(id, idx + 1));
        }
    }

    fn snapshot(&self) -> QueueStatus {
        let mut jobs: Vec<JobSnapshot> = self.jobs.values().map(JobSnapshot::from).collect();
        jobs.sort_by_key(|j| j.id);
        QueueStatus {
            total_queued: self
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Queued)
                .count(),
            active_count: self.active.len(),
            completed_count: self.completed_total,
            jobs,
        }
    }

    fn update_idle(&self) {
        let idle =
            self.active.is_empty() && self.jobs.values().all(|j| j.status.is_terminal());
        self.idle_tx.send_if_modified(|current| {
            if *current != idle {
                *current = idle;
                true
            } else {
                false
            }
        });
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
