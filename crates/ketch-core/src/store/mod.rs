//! Durable task records and the store interface.
//!
//! A record is everything needed to resume a task after a process restart:
//! the original request, the output path, validators from the last probe,
//! and the per-segment progress snapshot.

mod memory;
mod sqlite;

pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

use crate::error::ErrorInfo;
use crate::model::DownloadRequest;
use crate::segment::Segment;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Persisted lifecycle state, serialized UPPERCASE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Queued => "QUEUED",
            TaskState::Downloading => "DOWNLOADING",
            TaskState::Paused => "PAUSED",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
            TaskState::Canceled => "CANCELED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TaskState::Pending),
            "QUEUED" => Some(TaskState::Queued),
            "DOWNLOADING" => Some(TaskState::Downloading),
            "PAUSED" => Some(TaskState::Paused),
            "COMPLETED" => Some(TaskState::Completed),
            "FAILED" => Some(TaskState::Failed),
            "CANCELED" => Some(TaskState::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }

    /// States a coordinator can pick up after a restart. A task that died
    /// mid-download restores as PAUSED.
    pub fn is_restorable(self) -> bool {
        matches!(
            self,
            TaskState::Pending | TaskState::Queued | TaskState::Downloading | TaskState::Paused
        )
    }
}

/// One persisted task row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub request: DownloadRequest,
    pub output_path: Option<PathBuf>,
    pub state: TaskState,
    /// -1 while the total is unknown.
    pub total_bytes: i64,
    pub downloaded_bytes: u64,
    pub accept_ranges: Option<bool>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub segments: Option<Vec<Segment>>,
    /// Source tag, e.g. `"http"`.
    pub source_type: String,
    /// Opaque per-source resume blob; the engine never interprets it.
    pub source_resume_state: Option<Vec<u8>>,
    pub error: Option<ErrorInfo>,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub updated_at: i64,
}

impl TaskRecord {
    pub fn new(task_id: String, request: DownloadRequest, source_type: &str) -> Self {
        let now = now_ms();
        Self {
            task_id,
            request,
            output_path: None,
            state: TaskState::Pending,
            total_bytes: -1,
            downloaded_bytes: 0,
            accept_ranges: None,
            etag: None,
            last_modified: None,
            segments: None,
            source_type: source_type.to_string(),
            source_resume_state: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total(&self) -> Option<u64> {
        (self.total_bytes >= 0).then_some(self.total_bytes as u64)
    }

    /// Bump `updated_at`, clamped so it never goes backwards even if the
    /// wall clock does.
    pub fn touch(&mut self) {
        self.updated_at = self.updated_at.max(now_ms());
    }
}

/// Fresh opaque task id.
pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current wall clock in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Durable record storage.
///
/// `save` is an upsert and must be crash-safe: it either fully persists the
/// record or leaves the previous one intact.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    async fn save(&self, record: &TaskRecord) -> Result<()>;
    async fn load(&self, task_id: &str) -> Result<Option<TaskRecord>>;
    async fn load_all(&self) -> Result<Vec<TaskRecord>>;
    async fn remove(&self, task_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Destination;

    fn record(id: &str) -> TaskRecord {
        TaskRecord::new(
            id.to_string(),
            DownloadRequest::new(
                "https://example.com/file.bin",
                Destination::Directory(PathBuf::from("/tmp")),
            )
            .connections(4),
            "http",
        )
    }

    #[test]
    fn state_string_roundtrip() {
        for s in [
            TaskState::Pending,
            TaskState::Queued,
            TaskState::Downloading,
            TaskState::Paused,
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Canceled,
        ] {
            assert_eq!(TaskState::from_str(s.as_str()), Some(s));
        }
        assert_eq!(TaskState::from_str("bogus"), None);
    }

    #[test]
    fn terminal_and_restorable_partition() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(TaskState::Downloading.is_restorable());
        assert!(TaskState::Paused.is_restorable());
        assert!(!TaskState::Completed.is_restorable());
    }

    #[test]
    fn touch_never_goes_backwards() {
        let mut r = record("t");
        r.updated_at = i64::MAX - 1;
        r.touch();
        assert_eq!(r.updated_at, i64::MAX - 1);

        let mut r = record("t");
        let before = r.updated_at;
        r.touch();
        assert!(r.updated_at >= before);
    }

    #[test]
    fn record_json_roundtrip() {
        let mut r = record("abc-123");
        r.segments = Some(vec![Segment::new(0, 0, 499), Segment::new(1, 500, 999)]);
        r.error = Some(ErrorInfo {
            kind: "network".into(),
            message: "reset".into(),
        });
        let json = serde_json::to_string(&r).unwrap();
        let back: TaskRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn unknown_json_fields_are_ignored() {
        let r = record("abc");
        let mut v = serde_json::to_value(&r).unwrap();
        v["someFutureField"] = serde_json::json!(42);
        let back: TaskRecord = serde_json::from_value(v).unwrap();
        assert_eq!(back.task_id, "abc");
    }

    #[test]
    fn total_handles_unknown_sentinel() {
        let mut r = record("t");
        assert_eq!(r.total(), None);
        r.total_bytes = 0;
        assert_eq!(r.total(), Some(0));
        r.total_bytes = 1000;
        assert_eq!(r.total(), Some(1000));
    }
}
