//! Request and reactive-state types shared across the engine.

use crate::error::DownloadError;
use crate::progress::Progress;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

/// Admission priority. Ordering matters: `Urgent` preempts lower priorities.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Per-task or global byte-rate cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpeedLimit {
    #[default]
    Unlimited,
    /// Bytes per second, >= 1.
    BytesPerSec(u64),
}

impl SpeedLimit {
    /// Rate in bytes/sec, or `None` when unlimited.
    pub fn bytes_per_sec(&self) -> Option<u64> {
        match self {
            SpeedLimit::Unlimited => None,
            SpeedLimit::BytesPerSec(n) => Some((*n).max(1)),
        }
    }
}

/// When a task becomes eligible for the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Schedule {
    #[default]
    Immediate,
    /// Absolute instant, milliseconds since the Unix epoch.
    At(i64),
    /// Delay from enqueue, milliseconds.
    After(u64),
}

impl Schedule {
    /// Remaining wait from `now_ms` given the task's `created_at`.
    /// `None` means the schedule is already due.
    pub fn remaining(&self, created_at_ms: i64, now_ms: i64) -> Option<Duration> {
        let due = match self {
            Schedule::Immediate => return None,
            Schedule::At(ms) => *ms,
            Schedule::After(delay) => created_at_ms.saturating_add(*delay as i64),
        };
        if due <= now_ms {
            None
        } else {
            Some(Duration::from_millis((due - now_ms) as u64))
        }
    }
}

/// A lazy boolean gate: the task may only start once every condition reads
/// `true`. Conditions are live process objects and are not persisted.
#[derive(Debug, Clone)]
pub struct StartCondition {
    rx: watch::Receiver<bool>,
}

impl StartCondition {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Condition backed by a fresh channel; returns the sender for the caller
    /// to flip.
    pub fn toggle() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn is_met(&self) -> bool {
        *self.rx.borrow()
    }

    /// Suspend until the condition reads `true`. A dropped sender counts as
    /// permanently unmet only if it never became true.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone; last observed value is final.
                if *rx.borrow() {
                    return;
                }
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Where the output file goes, relative to the remote-suggested filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Destination {
    /// Existing directory; the suggested filename is appended.
    Directory(PathBuf),
    /// Full output path, used verbatim.
    FilePath(PathBuf),
    /// Bare name, appended to the configured default directory.
    FileName(String),
}

/// Immutable input describing one download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub destination: Destination,
    /// Requested parallel connections, >= 1. Ignored when the server refuses
    /// byte ranges.
    pub connections: u32,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub speed_limit: SpeedLimit,
    #[serde(default)]
    pub schedule: Schedule,
    /// Live gates; not persisted and absent after a restore.
    #[serde(skip)]
    pub conditions: Vec<StartCondition>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, destination: Destination) -> Self {
        Self {
            url: url.into(),
            destination,
            connections: 1,
            headers: HashMap::new(),
            priority: Priority::default(),
            speed_limit: SpeedLimit::default(),
            schedule: Schedule::default(),
            conditions: Vec::new(),
        }
    }

    pub fn connections(mut self, n: u32) -> Self {
        self.connections = n.max(1);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn speed_limit(mut self, limit: SpeedLimit) -> Self {
        self.speed_limit = limit;
        self
    }

    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn condition(mut self, condition: StartCondition) -> Self {
        self.conditions.push(condition);
        self
    }
}

impl PartialEq for DownloadRequest {
    /// Conditions are live channels and excluded from equality.
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
            && self.destination == other.destination
            && self.connections == other.connections
            && self.headers == other.headers
            && self.priority == other.priority
            && self.speed_limit == other.speed_limit
            && self.schedule == other.schedule
    }
}

/// Live state of a task, published through a watch cell.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadState {
    Idle,
    Scheduled(Schedule),
    Queued,
    /// Micro-state while the coordinator probes and plans; not a resting state.
    Pending,
    Downloading(Progress),
    Paused(Progress),
    Completed(PathBuf),
    Failed(DownloadError),
    Canceled,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed(_) | DownloadState::Failed(_) | DownloadState::Canceled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_is_preemption_order() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn priority_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Priority::Urgent).unwrap(), "\"URGENT\"");
        assert_eq!(serde_json::to_string(&Priority::Low).unwrap(), "\"LOW\"");
    }

    #[test]
    fn schedule_remaining() {
        let s = Schedule::Immediate;
        assert_eq!(s.remaining(0, 100), None);

        let s = Schedule::At(1_000);
        assert_eq!(s.remaining(0, 400), Some(Duration::from_millis(600)));
        assert_eq!(s.remaining(0, 1_000), None);

        let s = Schedule::After(500);
        assert_eq!(s.remaining(100, 200), Some(Duration::from_millis(400)));
        assert_eq!(s.remaining(100, 700), None);
    }

    #[test]
    fn request_roundtrips_through_json() {
        let req = DownloadRequest::new(
            "https://example.com/file.iso",
            Destination::Directory(PathBuf::from("/tmp")),
        )
        .connections(4)
        .priority(Priority::High)
        .speed_limit(SpeedLimit::BytesPerSec(1 << 20))
        .header("authorization", "Bearer x");

        let json = serde_json::to_string(&req).unwrap();
        let back: DownloadRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn condition_toggle_reports_state() {
        let (tx, cond) = StartCondition::toggle();
        assert!(!cond.is_met());
        tx.send(true).unwrap();
        assert!(cond.is_met());
    }

    #[test]
    fn terminal_states() {
        assert!(DownloadState::Canceled.is_terminal());
        assert!(DownloadState::Completed(PathBuf::from("/x")).is_terminal());
        assert!(!DownloadState::Queued.is_terminal());
        assert!(!DownloadState::Pending.is_terminal());
    }
}
