//! The coordinator run loop.
//!
//! One coordinator task per download. It owns the file writer and the
//! fetcher, reacts to commands with priority over transfer work, consults
//! the retry policy, and persists every state transition so a crash can
//! only lose sub-second progress.

use super::validate::{check_resume, ResumeCheck};
use super::TaskCommand;
use crate::dest;
use crate::error::{DownloadError, ErrorInfo};
use crate::fetcher::SegmentedFetcher;
use crate::limiter::{LimiterPair, SpeedLimiter};
use crate::model::{DownloadState, Schedule, StartCondition};
use crate::probe::RangeProber;
use crate::progress::Progress;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::scheduler::{host_key, AdmissionRequest, Permit, PreemptRx, SchedulerHandle};
use crate::segment::{self, Segment};
use crate::source::SourceSet;
use crate::storage::{self, FileWriter, FileWriterBuilder};
use crate::store::{now_ms, TaskRecord, TaskState, TaskStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// How often in-flight segment progress is written to the store.
const PERSIST_INTERVAL: Duration = Duration::from_secs(1);

/// Everything a coordinator needs at spawn time.
pub(crate) struct CoordinatorParams {
    pub record: TaskRecord,
    pub store: Arc<dyn TaskStore>,
    pub sources: SourceSet,
    pub scheduler: SchedulerHandle,
    pub global_limiter: SpeedLimiter,
    pub retry: RetryPolicy,
    pub read_timeout: Duration,
    pub progress_interval: Duration,
    pub default_dir: PathBuf,
    pub auto_start: bool,
    /// Restored from DOWNLOADING: skip the paused rest state and requeue.
    pub auto_resume: bool,
    pub cmd_rx: mpsc::Receiver<TaskCommand>,
    pub state_tx: watch::Sender<DownloadState>,
    pub segments_tx: watch::Sender<Vec<Segment>>,
}

/// Where the FSM goes next after a stage completes.
enum Stage {
    Scheduled,
    WaitResume,
    Queued,
    Done,
}

/// Control decision captured while a fetch is in flight.
enum PendingControl {
    None,
    Pause,
    Cancel,
    Preempt,
    Reschedule(Schedule, Vec<StartCondition>),
}

pub(crate) struct TaskCoordinator {
    record: TaskRecord,
    store: Arc<dyn TaskStore>,
    sources: SourceSet,
    scheduler: SchedulerHandle,
    global_limiter: SpeedLimiter,
    task_limiter: SpeedLimiter,
    retry: RetryPolicy,
    read_timeout: Duration,
    progress_interval: Duration,
    default_dir: PathBuf,
    auto_start: bool,
    auto_resume: bool,
    conditions: Vec<StartCondition>,
    cmd_rx: mpsc::Receiver<TaskCommand>,
    state_tx: watch::Sender<DownloadState>,
    segments_tx: watch::Sender<Vec<Segment>>,
    connections_tx: watch::Sender<u32>,
}

impl TaskCoordinator {
    pub fn new(params: CoordinatorParams) -> Self {
        let task_limiter = SpeedLimiter::new(params.record.request.speed_limit);
        let connections = params.record.request.connections.max(1);
        let conditions = params.record.request.conditions.clone();
        Self {
            record: params.record,
            store: params.store,
            sources: params.sources,
            scheduler: params.scheduler,
            global_limiter: params.global_limiter,
            task_limiter,
            retry: params.retry,
            read_timeout: params.read_timeout,
            progress_interval: params.progress_interval,
            default_dir: params.default_dir,
            auto_start: params.auto_start,
            auto_resume: params.auto_resume,
            conditions,
            cmd_rx: params.cmd_rx,
            state_tx: params.state_tx,
            segments_tx: params.segments_tx,
            connections_tx: watch::channel(connections).0,
        }
    }

    pub async fn run(mut self) {
        let task_id = self.record.task_id.clone();
        if let Err(err) = self.drive().await {
            // Only store failures land here; surface them as terminal state
            // without touching the (unwritable) record again.
            tracing::error!(task_id = %task_id, error = %err, "coordinator store failure");
            let _ = self.state_tx.send(DownloadState::Failed(DownloadError::Unknown(format!(
                "task store failure: {err}"
            ))));
        }
    }

    async fn drive(&mut self) -> anyhow::Result<()> {
        if let Some(segments) = &self.record.segments {
            let _ = self.segments_tx.send(segments.clone());
        }

        let mut stage = self.initial_stage();
        loop {
            stage = match stage {
                Stage::Scheduled => self.stage_scheduled().await?,
                Stage::WaitResume => self.stage_wait_resume().await?,
                Stage::Queued => self.stage_queued().await?,
                Stage::Done => return Ok(()),
            };
        }
    }

    fn initial_stage(&mut self) -> Stage {
        match self.record.state {
            TaskState::Paused if !self.auto_resume => {
                self.publish(DownloadState::Paused(self.record_progress()));
                Stage::WaitResume
            }
            TaskState::Paused | TaskState::Downloading | TaskState::Queued => Stage::Queued,
            _ if self.has_gate() => Stage::Scheduled,
            _ if !self.auto_start => {
                self.publish(DownloadState::Queued);
                Stage::WaitResume
            }
            _ => Stage::Queued,
        }
    }

    fn has_gate(&self) -> bool {
        self.record.request.schedule != Schedule::Immediate || !self.conditions.is_empty()
    }

    /// Wait out the schedule and the start conditions, staying responsive.
    async fn stage_scheduled(&mut self) -> anyhow::Result<Stage> {
        self.publish(DownloadState::Scheduled(self.record.request.schedule));
        self.persist_state(TaskState::Pending).await?;

        let schedule = self.record.request.schedule;
        let created_at = self.record.created_at;
        let conditions = self.conditions.clone();
        let gate = async move {
            if let Some(wait) = schedule.remaining(created_at, now_ms()) {
                tokio::time::sleep(wait).await;
            }
            for condition in &conditions {
                condition.wait().await;
            }
        };
        tokio::pin!(gate);

        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => match cmd {
                    None => return Ok(Stage::Done),
                    Some(TaskCommand::Cancel) => return self.cancel_idle().await,
                    Some(TaskCommand::Pause) => {
                        self.publish(DownloadState::Paused(self.record_progress()));
                        self.persist_state(TaskState::Paused).await?;
                        return Ok(Stage::WaitResume);
                    }
                    // An explicit resume overrides the gate and starts now.
                    Some(TaskCommand::Resume) => return Ok(Stage::Queued),
                    Some(TaskCommand::Reschedule { schedule, conditions }) => {
                        self.apply_reschedule(schedule, conditions).await?;
                        return Ok(Stage::Scheduled);
                    }
                    Some(other) => self.apply_setting(other).await?,
                },
                _ = &mut gate => return Ok(Stage::Queued),
            }
        }
    }

    /// Rest state for paused tasks (and queued-but-held ones when the engine
    /// is configured not to auto-start).
    async fn stage_wait_resume(&mut self) -> anyhow::Result<Stage> {
        loop {
            match self.cmd_rx.recv().await {
                None => return Ok(Stage::Done),
                Some(TaskCommand::Resume) => return Ok(Stage::Queued),
                Some(TaskCommand::Cancel) => return self.cancel_idle().await,
                Some(TaskCommand::Reschedule { schedule, conditions }) => {
                    self.apply_reschedule(schedule, conditions).await?;
                    return Ok(Stage::Scheduled);
                }
                Some(TaskCommand::Pause) => {}
                Some(other) => self.apply_setting(other).await?,
            }
        }
    }

    /// Request admission and, once admitted, run the download phase.
    async fn stage_queued(&mut self) -> anyhow::Result<Stage> {
        self.publish(DownloadState::Queued);
        self.persist_state(TaskState::Queued).await?;

        let (permit_tx, mut permit_rx) = oneshot::channel();
        let (preempt_tx, preempt_rx) = mpsc::channel(1);
        self.scheduler.request(AdmissionRequest {
            task_id: self.record.task_id.clone(),
            host: host_key(&self.record.request.url),
            priority: self.record.request.priority,
            created_at: self.record.created_at,
            permit_tx,
            preempt_tx,
        });

        let permit = loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => match cmd {
                    None => {
                        self.scheduler.withdraw(&self.record.task_id);
                        return Ok(Stage::Done);
                    }
                    Some(TaskCommand::Cancel) => {
                        self.scheduler.withdraw(&self.record.task_id);
                        return self.cancel_idle().await;
                    }
                    Some(TaskCommand::Pause) => {
                        self.scheduler.withdraw(&self.record.task_id);
                        self.publish(DownloadState::Paused(self.record_progress()));
                        self.persist_state(TaskState::Paused).await?;
                        return Ok(Stage::WaitResume);
                    }
                    Some(TaskCommand::Reschedule { schedule, conditions }) => {
                        self.scheduler.withdraw(&self.record.task_id);
                        self.apply_reschedule(schedule, conditions).await?;
                        return Ok(Stage::Scheduled);
                    }
                    Some(TaskCommand::Resume) => {}
                    Some(other) => self.apply_setting(other).await?,
                },
                admitted = &mut permit_rx => match admitted {
                    Ok(permit) => break permit,
                    Err(_) => {
                        tracing::warn!(task_id = %self.record.task_id, "scheduler dropped admission");
                        return Ok(Stage::Done);
                    }
                },
            }
        };

        self.download_phase(permit, preempt_rx).await
    }

    /// Probe, plan, fetch with retry; runs while holding the permit.
    async fn download_phase(
        &mut self,
        permit: Permit,
        mut preempt_rx: PreemptRx,
    ) -> anyhow::Result<Stage> {
        let (_kind, engine) = match self.sources.resolve(&self.record.request.url) {
            Ok(resolved) => resolved,
            Err(e) => {
                drop(permit);
                return self.fail(e).await;
            }
        };

        self.publish(DownloadState::Pending);
        self.persist_state(TaskState::Pending).await?;

        // Probe, still responsive to control.
        let prober = RangeProber::new(Arc::clone(&engine), self.retry);
        let url = self.record.request.url.clone();
        let headers = self.record.request.headers.clone();
        let probe_fut = async { prober.probe(&url, &headers).await };
        tokio::pin!(probe_fut);
        let info = loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => match cmd {
                    None => return Ok(Stage::Done),
                    Some(TaskCommand::Cancel) => {
                        drop(permit);
                        return self.cancel_idle().await;
                    }
                    Some(TaskCommand::Pause) => {
                        drop(permit);
                        self.publish(DownloadState::Paused(self.record_progress()));
                        self.persist_state(TaskState::Paused).await?;
                        return Ok(Stage::WaitResume);
                    }
                    Some(TaskCommand::Reschedule { schedule, conditions }) => {
                        drop(permit);
                        self.apply_reschedule(schedule, conditions).await?;
                        return Ok(Stage::Scheduled);
                    }
                    Some(TaskCommand::Resume) => {}
                    Some(other) => self.apply_setting(other).await?,
                },
                probed = &mut probe_fut => match probed {
                    Ok(info) => break info,
                    Err(e) => {
                        drop(permit);
                        return self.fail(e).await;
                    }
                },
            }
        };

        // Settle the output path on first contact.
        if self.record.output_path.is_none() {
            let suggested =
                dest::suggested_filename(&self.record.request.url, info.content_disposition.as_deref());
            self.record.output_path = Some(dest::resolve_output_path(
                &self.record.request.destination,
                &suggested,
                &self.default_dir,
            ));
        }
        let output_path = self
            .record
            .output_path
            .clone()
            .unwrap_or_else(|| self.default_dir.join("download.bin"));
        if let Some(parent) = output_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                drop(permit);
                return self.fail(DownloadError::disk(&e)).await;
            }
        }
        let part_path = storage::part_path(&output_path);

        // Validator policy: any drift discards the partial file.
        let had_progress = self.record.downloaded_bytes > 0
            || self.record.segments.as_ref().map_or(false, |s| !s.is_empty());
        let mut restart = !had_progress;
        let mut force_single = false;
        if had_progress {
            match check_resume(&self.record, &info) {
                ResumeCheck::Resume => {}
                ResumeCheck::Restart { reason } => {
                    tracing::info!(task_id = %self.record.task_id, %reason, "discarding progress");
                    restart = true;
                }
                ResumeCheck::RestartSingleSegment => {
                    tracing::info!(task_id = %self.record.task_id, "range support lost; restarting single-segment");
                    restart = true;
                    force_single = true;
                }
            }
        }

        let total = info.content_length;
        let use_ranges = info.accept_ranges && !force_single;
        self.record.accept_ranges = Some(info.accept_ranges);
        self.record.etag = info.etag.clone();
        self.record.last_modified = info.last_modified.clone();
        self.record.total_bytes = total.map_or(-1, |n| n as i64);

        // Empty resource: an empty output file and done, no fetch.
        if total == Some(0) {
            drop(permit);
            if let Err(e) = std::fs::File::create(&output_path) {
                return self.fail(DownloadError::disk(&e)).await;
            }
            return self.complete(output_path, Vec::new()).await;
        }

        let mut segments: Vec<Segment> = if restart || self.record.segments.is_none() {
            if use_ranges && total.is_some() {
                segment::plan(total.unwrap_or(0), self.record.request.connections)
            } else {
                segment::single(total)
            }
        } else {
            self.record.segments.clone().unwrap_or_default()
        };
        // A plain stream cannot resume mid-file; any stale progress resets.
        if !use_ranges {
            for seg in &mut segments {
                seg.downloaded_bytes = 0;
            }
        }

        let writer = match self.open_writer(&part_path, restart, total) {
            Ok(w) => w,
            Err(e) => {
                drop(permit);
                return self.fail(DownloadError::disk(&e)).await;
            }
        };

        self.record.segments = Some(segments.clone());
        self.record.downloaded_bytes = segment::downloaded_total(&segments);
        self.publish(DownloadState::Downloading(self.record_progress()));
        self.persist_state(TaskState::Downloading).await?;
        let _ = self.segments_tx.send(segments.clone());

        let fetcher = SegmentedFetcher::new(
            Arc::clone(&engine),
            writer.clone(),
            LimiterPair::new(self.global_limiter.clone(), self.task_limiter.clone()),
            self.read_timeout,
            self.progress_interval,
        );
        let mut connections_rx = self.connections_tx.subscribe();
        let url = self.record.request.url.clone();
        let headers = self.record.request.headers.clone();

        let mut attempt: u32 = 0;
        loop {
            let before = segment::downloaded_total(&segments);
            let cancel = CancellationToken::new();
            let mut pending = PendingControl::None;

            let result = {
                let fetch = fetcher.run(
                    &url,
                    &headers,
                    &mut segments,
                    total,
                    use_ranges,
                    &mut connections_rx,
                    &cancel,
                    &self.state_tx,
                    &self.segments_tx,
                );
                tokio::pin!(fetch);
                let mut persist_tick = tokio::time::interval(PERSIST_INTERVAL);
                persist_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                let mut preempt_open = true;
                let mut cmd_open = true;

                loop {
                    tokio::select! {
                        biased;
                        cmd = self.cmd_rx.recv(), if cmd_open => {
                            match cmd {
                                // Every handle is gone; treat it as a cancel
                                // and stop polling the closed channel.
                                None => {
                                    cmd_open = false;
                                    pending = PendingControl::Cancel;
                                    cancel.cancel();
                                }
                                Some(TaskCommand::Cancel) => {
                                    pending = PendingControl::Cancel;
                                    cancel.cancel();
                                }
                                Some(TaskCommand::Pause) => {
                                    pending = PendingControl::Pause;
                                    cancel.cancel();
                                }
                                Some(TaskCommand::Reschedule { schedule, conditions }) => {
                                    pending = PendingControl::Reschedule(schedule, conditions);
                                    cancel.cancel();
                                }
                                Some(TaskCommand::Resume) => {}
                                Some(TaskCommand::SetSpeedLimit(limit)) => {
                                    self.task_limiter.set_limit(limit);
                                    self.record.request.speed_limit = limit;
                                    self.record.touch();
                                    self.store.save(&self.record).await?;
                                }
                                Some(TaskCommand::SetPriority(priority)) => {
                                    self.scheduler.set_priority(&self.record.task_id, priority);
                                    self.record.request.priority = priority;
                                    self.record.touch();
                                    self.store.save(&self.record).await?;
                                }
                                Some(TaskCommand::SetConnections(n)) => {
                                    let n = n.max(1);
                                    let _ = self.connections_tx.send(n);
                                    self.record.request.connections = n;
                                    self.record.touch();
                                    self.store.save(&self.record).await?;
                                }
                            }
                        }
                        signal = preempt_rx.recv(), if preempt_open => match signal {
                            Some(()) => {
                                tracing::info!(task_id = %self.record.task_id, "preempted by scheduler");
                                pending = PendingControl::Preempt;
                                cancel.cancel();
                            }
                            None => preempt_open = false,
                        },
                        _ = persist_tick.tick() => {
                            let snapshot = self.segments_tx.borrow().clone();
                            if !snapshot.is_empty() {
                                self.record.downloaded_bytes = segment::downloaded_total(&snapshot);
                                self.record.segments = Some(snapshot);
                                self.record.touch();
                                self.store.save(&self.record).await?;
                            }
                        }
                        finished = &mut fetch => break finished,
                    }
                }
            };

            self.record.segments = Some(segments.clone());
            self.record.downloaded_bytes = segment::downloaded_total(&segments);

            match result {
                Ok(()) => {
                    drop(permit);
                    if let Err(e) = self.finish_file(&writer, &output_path, total) {
                        return self.fail(e).await;
                    }
                    return self.complete(output_path, segments).await;
                }
                Err(DownloadError::Canceled) => {
                    writer.sync().ok();
                    drop(permit);
                    return match pending {
                        PendingControl::Pause => {
                            self.publish(DownloadState::Paused(self.record_progress()));
                            self.persist_state(TaskState::Paused).await?;
                            Ok(Stage::WaitResume)
                        }
                        PendingControl::Preempt => {
                            // Pause for the preemptor, then go straight back
                            // into the queue.
                            self.publish(DownloadState::Paused(self.record_progress()));
                            self.persist_state(TaskState::Paused).await?;
                            Ok(Stage::Queued)
                        }
                        PendingControl::Reschedule(schedule, conditions) => {
                            self.apply_reschedule(schedule, conditions).await?;
                            Ok(Stage::Scheduled)
                        }
                        PendingControl::Cancel | PendingControl::None => {
                            self.cancel_with_cleanup(writer).await
                        }
                    };
                }
                Err(e) => {
                    let progressed = segment::downloaded_total(&segments) > before;
                    attempt = if progressed { 1 } else { attempt + 1 };
                    self.persist_state(TaskState::Downloading).await?;
                    match self.retry.decide(attempt, &e) {
                        RetryDecision::NoRetry => {
                            drop(permit);
                            return self.fail(e).await;
                        }
                        RetryDecision::RetryAfter(delay) => {
                            tracing::info!(
                                task_id = %self.record.task_id,
                                attempt,
                                ?delay,
                                error = %e,
                                "retrying after backoff"
                            );
                            if let Some(stage) = self.backoff(delay, &mut preempt_rx).await? {
                                drop(permit);
                                return Ok(stage);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Sleep out a retry backoff, still honoring control. Returns the next
    /// stage when a command interrupts the wait.
    async fn backoff(
        &mut self,
        delay: Duration,
        preempt_rx: &mut PreemptRx,
    ) -> anyhow::Result<Option<Stage>> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        let mut preempt_open = true;
        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(TaskCommand::Cancel) => {
                        return self.cancel_idle().await.map(Some);
                    }
                    Some(TaskCommand::Pause) => {
                        self.publish(DownloadState::Paused(self.record_progress()));
                        self.persist_state(TaskState::Paused).await?;
                        return Ok(Some(Stage::WaitResume));
                    }
                    Some(TaskCommand::Reschedule { schedule, conditions }) => {
                        self.apply_reschedule(schedule, conditions).await?;
                        return Ok(Some(Stage::Scheduled));
                    }
                    Some(TaskCommand::Resume) => {}
                    Some(other) => self.apply_setting(other).await?,
                },
                signal = preempt_rx.recv(), if preempt_open => match signal {
                    Some(()) => {
                        self.publish(DownloadState::Paused(self.record_progress()));
                        self.persist_state(TaskState::Paused).await?;
                        return Ok(Some(Stage::Queued));
                    }
                    None => preempt_open = false,
                },
                _ = &mut sleep => return Ok(None),
            }
        }
    }

    fn open_writer(
        &self,
        part_path: &std::path::Path,
        restart: bool,
        total: Option<u64>,
    ) -> std::io::Result<FileWriter> {
        if !restart && part_path.exists() {
            return FileWriter::open_existing(part_path);
        }
        let mut builder = FileWriterBuilder::create(part_path)?;
        if let Some(n) = total {
            builder.preallocate(n)?;
        }
        Ok(builder.build())
    }

    fn finish_file(
        &self,
        writer: &FileWriter,
        output_path: &std::path::Path,
        total: Option<u64>,
    ) -> Result<(), DownloadError> {
        writer.sync().map_err(|e| DownloadError::disk(&e))?;
        if let Some(expected) = total {
            let on_disk = writer.len().map_err(|e| DownloadError::disk(&e))?;
            if on_disk != expected {
                return Err(DownloadError::Unknown(format!(
                    "size mismatch: expected {expected} bytes, wrote {on_disk}"
                )));
            }
        }
        writer
            .clone()
            .finalize(output_path)
            .map_err(|e| DownloadError::disk(&e))
    }

    /// Settings that apply in any state.
    async fn apply_setting(&mut self, cmd: TaskCommand) -> anyhow::Result<()> {
        match cmd {
            TaskCommand::SetSpeedLimit(limit) => {
                self.task_limiter.set_limit(limit);
                self.record.request.speed_limit = limit;
            }
            TaskCommand::SetPriority(priority) => {
                self.scheduler.set_priority(&self.record.task_id, priority);
                self.record.request.priority = priority;
            }
            TaskCommand::SetConnections(n) => {
                let n = n.max(1);
                let _ = self.connections_tx.send(n);
                self.record.request.connections = n;
            }
            _ => return Ok(()),
        }
        self.record.touch();
        self.store.save(&self.record).await?;
        Ok(())
    }

    async fn apply_reschedule(
        &mut self,
        schedule: Schedule,
        conditions: Vec<StartCondition>,
    ) -> anyhow::Result<()> {
        self.record.request.schedule = schedule;
        self.conditions = conditions;
        // Progress is preserved; the record rests as paused until the new
        // schedule fires.
        self.persist_state(TaskState::Paused).await
    }

    /// Cancel from a state with no writer open.
    async fn cancel_idle(&mut self) -> anyhow::Result<Stage> {
        if let Some(path) = &self.record.output_path {
            let part = storage::part_path(path);
            if part.exists() {
                let _ = std::fs::remove_file(&part);
            }
        }
        self.publish(DownloadState::Canceled);
        self.persist_state(TaskState::Canceled).await?;
        Ok(Stage::Done)
    }

    /// Cancel with the writer open: close it and delete the partial file.
    async fn cancel_with_cleanup(&mut self, writer: FileWriter) -> anyhow::Result<Stage> {
        if let Err(e) = writer.delete() {
            tracing::warn!(task_id = %self.record.task_id, error = %e, "partial file cleanup failed");
        }
        self.publish(DownloadState::Canceled);
        self.persist_state(TaskState::Canceled).await?;
        Ok(Stage::Done)
    }

    async fn complete(
        &mut self,
        output_path: PathBuf,
        segments: Vec<Segment>,
    ) -> anyhow::Result<Stage> {
        self.record.segments = Some(segments);
        if self.record.total_bytes >= 0 {
            self.record.downloaded_bytes = self.record.total_bytes as u64;
        } else {
            // An open-ended stream ends knowing its real size.
            self.record.total_bytes = self.record.downloaded_bytes as i64;
        }
        self.record.error = None;
        self.publish(DownloadState::Completed(output_path));
        self.persist_state(TaskState::Completed).await?;
        tracing::info!(task_id = %self.record.task_id, "download completed");
        Ok(Stage::Done)
    }

    async fn fail(&mut self, error: DownloadError) -> anyhow::Result<Stage> {
        self.record.error = Some(ErrorInfo::from(&error));
        tracing::warn!(task_id = %self.record.task_id, error = %error, "download failed");
        self.publish(DownloadState::Failed(error));
        self.persist_state(TaskState::Failed).await?;
        Ok(Stage::Done)
    }

    fn record_progress(&self) -> Progress {
        Progress::new(self.record.downloaded_bytes, self.record.total())
    }

    fn publish(&self, state: DownloadState) {
        let _ = self.state_tx.send(state);
    }

    async fn persist_state(&mut self, state: TaskState) -> anyhow::Result<()> {
        self.record.state = state;
        self.record.touch();
        self.store.save(&self.record).await
    }
}
