//! Global admission control.
//!
//! A single actor task owns the wait queue and the running set, so admission
//! decisions never race and the hot path takes no lock. Coordinators request
//! a slot, hold the returned permit while downloading, and drop it when they
//! leave the downloading phase; the drop wakes the scheduler to admit the
//! next candidate.

mod state;

use crate::model::Priority;
use tokio::sync::{mpsc, oneshot};

/// Admission limits; `max_connections_per_host` keys on the lowercased URL
/// authority.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub max_concurrent_downloads: usize,
    pub max_connections_per_host: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            max_connections_per_host: 4,
        }
    }
}

/// Lowercased authority of a URL, the per-host admission key.
pub fn host_key(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.authority().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Signal asking a running task to pause and requeue so a higher-priority
/// task can take its slot.
pub(crate) type PreemptRx = mpsc::Receiver<()>;

pub(crate) struct AdmissionRequest {
    pub task_id: String,
    pub host: String,
    pub priority: Priority,
    pub created_at: i64,
    pub permit_tx: oneshot::Sender<Permit>,
    pub preempt_tx: mpsc::Sender<()>,
}

pub(crate) enum SchedMsg {
    Request(AdmissionRequest),
    /// Leave the wait queue without ever running (cancel while queued).
    Withdraw { task_id: String },
    Release { task_id: String },
    SetPriority { task_id: String, priority: Priority },
}

/// Proof of admission. Dropping it releases the slot and wakes the scheduler.
#[derive(Debug)]
pub struct Permit {
    task_id: String,
    tx: mpsc::UnboundedSender<SchedMsg>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let _ = self.tx.send(SchedMsg::Release {
            task_id: std::mem::take(&mut self.task_id),
        });
    }
}

/// Cheap handle to the scheduler actor.
#[derive(Debug, Clone)]
pub(crate) struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedMsg>,
}

impl SchedulerHandle {
    /// Spawn the actor and return its handle.
    pub fn spawn(config: SchedulerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor_tx = tx.clone();
        tokio::spawn(state::run_actor(config, rx, actor_tx));
        Self { tx }
    }

    pub fn request(&self, req: AdmissionRequest) {
        let _ = self.tx.send(SchedMsg::Request(req));
    }

    pub fn withdraw(&self, task_id: &str) {
        let _ = self.tx.send(SchedMsg::Withdraw {
            task_id: task_id.to_string(),
        });
    }

    pub fn set_priority(&self, task_id: &str, priority: Priority) {
        let _ = self.tx.send(SchedMsg::SetPriority {
            task_id: task_id.to_string(),
            priority,
        });
    }
}
