//! Resume-safety validation against a fresh probe.
//!
//! On-disk bytes must always correspond to the resource the server currently
//! serves. Any validator drift (ETag, Last-Modified, Content-Length) means
//! the partial file is worthless and the task restarts from offset zero.

use crate::http::ServerInfo;
use crate::store::TaskRecord;

/// Outcome of comparing persisted validators with a fresh probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeCheck {
    /// Validators match; resuming from the persisted segments is safe.
    Resume,
    /// The remote changed; restart from zero with a truncated file.
    Restart { reason: String },
    /// The remote no longer serves byte ranges; restart single-segment.
    RestartSingleSegment,
}

/// Decide whether persisted progress can be trusted against `info`.
///
/// A record that never probed (no validators, no size) always resumes; there
/// is nothing to contradict. A validator present on one side but not the
/// other counts as changed.
pub fn check_resume(record: &TaskRecord, info: &ServerInfo) -> ResumeCheck {
    let has_stored =
        record.total().is_some() || record.etag.is_some() || record.last_modified.is_some();
    if !has_stored {
        return ResumeCheck::Resume;
    }

    let mut changed: Vec<&str> = Vec::new();
    if differs(&record.etag, &info.etag) {
        changed.push("ETag");
    }
    if differs(&record.last_modified, &info.last_modified) {
        changed.push("Last-Modified");
    }
    let probe_total = info.content_length.map(|n| n as i64);
    if record.total_bytes >= 0 && probe_total != Some(record.total_bytes) {
        changed.push("Content-Length");
    }

    if !changed.is_empty() {
        return ResumeCheck::Restart {
            reason: format!("remote changed ({})", changed.join(", ")),
        };
    }

    let was_segmented = record
        .segments
        .as_ref()
        .map_or(false, |segs| segs.len() > 1);
    if was_segmented && !info.accept_ranges {
        return ResumeCheck::RestartSingleSegment;
    }

    ResumeCheck::Resume
}

fn differs(stored: &Option<String>, probed: &Option<String>) -> bool {
    match (stored, probed) {
        (None, None) => false,
        (Some(a), Some(b)) => a != b,
        _ => true,
    }
}
