//! Process-wide task directory and the public engine API.
//!
//! The registry owns every live coordinator, replays persisted tasks on
//! startup, and hands out [`TaskHandle`]s whose reactive cells mirror each
//! task's state and segment snapshot.

use crate::config::KetchConfig;
use crate::error::DownloadError;
use crate::http::CurlHttpEngine;
use crate::model::{
    DownloadState, DownloadRequest, Priority, Schedule, SpeedLimit, StartCondition,
};
use crate::retry::RetryPolicy;
use crate::scheduler::{SchedulerConfig, SchedulerHandle};
use crate::segment::Segment;
use crate::source::SourceSet;
use crate::storage;
use crate::store::{new_task_id, TaskRecord, TaskState, TaskStore};
use crate::task::{CoordinatorParams, TaskCoordinator};
use crate::limiter::SpeedLimiter;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::task::TaskCommand;

/// Depth of each coordinator's command channel.
const COMMAND_BUFFER: usize = 16;

/// Live handle to one task. Cloneable; all clones address the same task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    task_id: String,
    cmd_tx: mpsc::Sender<TaskCommand>,
    state_rx: watch::Receiver<DownloadState>,
    segments_rx: watch::Receiver<Vec<Segment>>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.task_id
    }

    /// Reactive state cell; subscribers see the current value immediately.
    pub fn state(&self) -> watch::Receiver<DownloadState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> DownloadState {
        self.state_rx.borrow().clone()
    }

    /// Reactive segment snapshot.
    pub fn segments(&self) -> watch::Receiver<Vec<Segment>> {
        self.segments_rx.clone()
    }

    pub async fn pause(&self) {
        let _ = self.cmd_tx.send(TaskCommand::Pause).await;
    }

    pub async fn resume(&self) {
        let _ = self.cmd_tx.send(TaskCommand::Resume).await;
    }

    /// Idempotent; a terminal task ignores it.
    pub async fn cancel(&self) {
        let _ = self.cmd_tx.send(TaskCommand::Cancel).await;
    }

    pub async fn reschedule(&self, schedule: Schedule, conditions: Vec<StartCondition>) {
        let _ = self
            .cmd_tx
            .send(TaskCommand::Reschedule {
                schedule,
                conditions,
            })
            .await;
    }

    pub async fn set_speed_limit(&self, limit: SpeedLimit) {
        let _ = self.cmd_tx.send(TaskCommand::SetSpeedLimit(limit)).await;
    }

    pub async fn set_priority(&self, priority: Priority) {
        let _ = self.cmd_tx.send(TaskCommand::SetPriority(priority)).await;
    }

    /// Change the live connection count; a running fetch re-segments.
    pub async fn set_connections(&self, connections: u32) {
        let _ = self
            .cmd_tx
            .send(TaskCommand::SetConnections(connections))
            .await;
    }

    /// Suspend until the task reaches a terminal state.
    pub async fn wait(&self) -> Result<PathBuf, DownloadError> {
        let mut rx = self.state_rx.clone();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                DownloadState::Completed(path) => return Ok(path),
                DownloadState::Failed(e) => return Err(e),
                DownloadState::Canceled => return Err(DownloadError::Canceled),
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(DownloadError::Unknown("task dropped".into()));
            }
        }
    }
}

struct TaskEntry {
    handle: TaskHandle,
}

/// The engine facade: admission, persistence, and handle bookkeeping.
pub struct TaskRegistry {
    config: KetchConfig,
    store: Arc<dyn TaskStore>,
    sources: SourceSet,
    scheduler: SchedulerHandle,
    global_limiter: SpeedLimiter,
    tasks: Mutex<HashMap<String, TaskEntry>>,
}

impl TaskRegistry {
    /// Registry with the production curl transport.
    pub fn new(config: KetchConfig, store: Arc<dyn TaskStore>) -> Self {
        let engine = Arc::new(CurlHttpEngine::new());
        Self::with_sources(config, store, SourceSet::with_http(engine))
    }

    /// Registry with caller-provided source engines (tests, embedders).
    pub fn with_sources(
        config: KetchConfig,
        store: Arc<dyn TaskStore>,
        sources: SourceSet,
    ) -> Self {
        let scheduler = SchedulerHandle::spawn(SchedulerConfig {
            max_concurrent_downloads: config.max_concurrent_downloads,
            max_connections_per_host: config.max_connections_per_host,
        });
        let global_limiter = SpeedLimiter::new(config.global_speed_limit);
        Self {
            config,
            store,
            sources,
            scheduler,
            global_limiter,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Replay restorable records from the store. Tasks persisted as
    /// DOWNLOADING come back as PAUSED and re-enter the queue on their own;
    /// PAUSED tasks wait for an explicit resume. Returns how many tasks were
    /// restored.
    pub async fn restore(&self) -> Result<usize> {
        let records = self.store.load_all().await.context("load persisted tasks")?;
        let mut restored = 0;
        for mut record in records {
            if !record.state.is_restorable() {
                continue;
            }
            let auto_resume = record.state == TaskState::Downloading
                || record.state == TaskState::Queued
                || record.state == TaskState::Pending;
            if record.state == TaskState::Downloading {
                record.state = TaskState::Paused;
                record.touch();
                self.store.save(&record).await?;
            }
            tracing::info!(task_id = %record.task_id, state = record.state.as_str(), "restoring task");
            self.spawn_task(record, auto_resume);
            restored += 1;
        }
        Ok(restored)
    }

    /// Create, persist, and start a new task.
    pub async fn enqueue(&self, request: DownloadRequest) -> Result<TaskHandle> {
        url::Url::parse(&request.url)
            .with_context(|| format!("invalid download url {:?}", request.url))?;

        let task_id = new_task_id();
        let source_type = self
            .sources
            .resolve(&request.url)
            .map(|(kind, _)| kind.as_str().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let record = TaskRecord::new(task_id, request, &source_type);
        self.store.save(&record).await.context("persist new task")?;
        Ok(self.spawn_task(record, false))
    }

    /// Handle for a live task.
    pub fn get(&self, task_id: &str) -> Option<TaskHandle> {
        let tasks = self.tasks.lock().expect("registry poisoned");
        tasks.get(task_id).map(|e| e.handle.clone())
    }

    /// Handles for every live task.
    pub fn handles(&self) -> Vec<TaskHandle> {
        let tasks = self.tasks.lock().expect("registry poisoned");
        tasks.values().map(|e| e.handle.clone()).collect()
    }

    /// Cancel a task, delete its partial file, evict its record, and drop
    /// the handle. Completed output files are left alone.
    pub async fn remove(&self, task_id: &str) -> Result<()> {
        let handle = self.get(task_id);
        if let Some(handle) = handle {
            if !handle.current_state().is_terminal() {
                handle.cancel().await;
                let mut rx = handle.state();
                let _ = tokio::time::timeout(Duration::from_secs(10), async {
                    while !rx.borrow_and_update().is_terminal() {
                        if rx.changed().await.is_err() {
                            break;
                        }
                    }
                })
                .await;
            }
        }
        if let Some(record) = self.store.load(task_id).await? {
            if let Some(path) = &record.output_path {
                let part = storage::part_path(path);
                if part.exists() {
                    let _ = std::fs::remove_file(&part);
                }
            }
        }
        self.store.remove(task_id).await?;
        self.tasks
            .lock()
            .expect("registry poisoned")
            .remove(task_id);
        Ok(())
    }

    /// Process-wide rate cap shared by every task.
    pub fn set_global_speed_limit(&self, limit: SpeedLimit) {
        self.global_limiter.set_limit(limit);
    }

    fn spawn_task(&self, record: TaskRecord, auto_resume: bool) -> TaskHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(DownloadState::Idle);
        let segments = record.segments.clone().unwrap_or_default();
        let (segments_tx, segments_rx) = watch::channel(segments);

        let handle = TaskHandle {
            task_id: record.task_id.clone(),
            cmd_tx,
            state_rx,
            segments_rx,
        };

        let coordinator = TaskCoordinator::new(CoordinatorParams {
            record,
            store: Arc::clone(&self.store),
            sources: self.sources.clone(),
            scheduler: self.scheduler.clone(),
            global_limiter: self.global_limiter.clone(),
            retry: RetryPolicy::new(
                self.config.retry_count,
                Duration::from_millis(self.config.retry_delay_ms),
            ),
            read_timeout: Duration::from_secs(self.config.read_timeout_secs),
            progress_interval: Duration::from_millis(self.config.progress_interval_ms),
            default_dir: self.config.default_download_dir.clone(),
            auto_start: self.config.auto_start,
            auto_resume,
            cmd_rx,
            state_tx,
            segments_tx,
        });
        tokio::spawn(coordinator.run());

        self.tasks
            .lock()
            .expect("registry poisoned")
            .insert(handle.task_id.clone(), TaskEntry {
                handle: handle.clone(),
            });
        handle
    }
}
