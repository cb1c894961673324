//! Shared helpers for integration tests.

pub mod range_server;

use ketch_core::config::KetchConfig;
use ketch_core::model::DownloadState;
use ketch_core::registry::TaskHandle;
use std::path::Path;
use std::time::Duration;

/// Test config pointed at a scratch dir, tightened for fast feedback.
pub fn test_config(download_dir: &Path) -> KetchConfig {
    KetchConfig {
        default_download_dir: download_dir.to_path_buf(),
        max_concurrent_downloads: 3,
        max_connections_per_host: 8,
        retry_count: 3,
        retry_delay_ms: 100,
        progress_interval_ms: 50,
        read_timeout_secs: 10,
        ..KetchConfig::default()
    }
}

/// Deterministic pseudo-random test body.
pub fn body_of(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

/// Wait until the task state satisfies `pred`, or panic with the last
/// observed state after `timeout`.
pub async fn wait_for_state(
    handle: &TaskHandle,
    timeout: Duration,
    pred: impl Fn(&DownloadState) -> bool,
) -> DownloadState {
    let mut rx = handle.state();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let state = rx.borrow_and_update().clone();
        if pred(&state) {
            return state;
        }
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or_default();
        if remaining.is_zero() {
            panic!("timed out waiting for state; last seen {state:?}");
        }
        if tokio::time::timeout(remaining, rx.changed()).await.is_err() {
            let state = rx.borrow().clone();
            panic!("timed out waiting for state; last seen {state:?}");
        }
    }
}

/// Wait until the task reports at least `bytes` of progress.
pub async fn wait_for_progress(handle: &TaskHandle, timeout: Duration, bytes: u64) -> u64 {
    let state = wait_for_state(handle, timeout, |s| match s {
        DownloadState::Downloading(p) => p.downloaded >= bytes,
        s if s.is_terminal() => true,
        _ => false,
    })
    .await;
    match state {
        DownloadState::Downloading(p) => p.downloaded,
        other => panic!("task ended before reaching {bytes} bytes: {other:?}"),
    }
}
