//! Single-segment fetch loop: pull chunks, pace them, write them at their
//! offsets, and account for every byte.

use crate::error::DownloadError;
use crate::http::{ByteRange, HttpEngine};
use crate::limiter::LimiterPair;
use crate::segment::Segment;
use crate::storage::FileWriter;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Everything one segment worker needs; owned so the worker can be spawned.
pub(super) struct SegmentJob {
    pub engine: Arc<dyn HttpEngine>,
    pub writer: FileWriter,
    pub limiters: LimiterPair,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub segment: Segment,
    /// False when the server refused ranges: fetch the whole body, no Range
    /// header. The segment must then start from zero.
    pub use_ranges: bool,
    /// Shared running total for this segment, read by the progress tick.
    pub counter: Arc<AtomicU64>,
    pub cancel: CancellationToken,
    pub read_timeout: Duration,
}

/// Chunk channel depth; bounds memory while the limiter is pacing writes.
const CHUNK_BUFFER: usize = 8;

pub(super) async fn fetch_segment(job: SegmentJob) -> (usize, Result<(), DownloadError>) {
    let index = job.segment.index;
    let result = fetch_inner(job).await;
    (index, result)
}

async fn fetch_inner(job: SegmentJob) -> Result<(), DownloadError> {
    let segment = job.segment;
    let total = segment.total_bytes();
    if segment.is_complete() {
        return Ok(());
    }

    // Without ranges the server always sends the whole body, so any partial
    // progress from an earlier attempt restarts from zero.
    let mut downloaded = if job.use_ranges {
        segment.downloaded_bytes
    } else {
        job.counter.store(0, Ordering::Release);
        0
    };

    let range = if job.use_ranges {
        Some(if segment.is_open_ended() {
            ByteRange::open(segment.current_offset())
        } else {
            ByteRange::closed(segment.current_offset(), segment.end)
        })
    } else {
        None
    };

    let (tx, mut rx) = mpsc::channel::<Bytes>(CHUNK_BUFFER);
    let engine_task = tokio::spawn({
        let engine = Arc::clone(&job.engine);
        let url = job.url.clone();
        let headers = job.headers.clone();
        async move { engine.fetch(&url, range, &headers, tx).await }
    });

    loop {
        let chunk = tokio::select! {
            biased;
            _ = job.cancel.cancelled() => {
                drop(rx);
                engine_task.abort();
                return Err(DownloadError::Canceled);
            }
            received = tokio::time::timeout(job.read_timeout, rx.recv()) => match received {
                Err(_) => {
                    drop(rx);
                    engine_task.abort();
                    return Err(DownloadError::Network(format!(
                        "segment {} read timed out after {:?}",
                        segment.index, job.read_timeout
                    )));
                }
                Ok(None) => break,
                Ok(Some(chunk)) => chunk,
            },
        };

        // Clamp over-delivery on closed ranges so a misbehaving server can
        // never write past the segment boundary.
        let room = total.saturating_sub(downloaded);
        let take = (chunk.len() as u64).min(room) as usize;
        if take > 0 {
            job.limiters.acquire(take).await;
            let offset = segment.start + downloaded;
            job.writer
                .write_at(offset, &chunk[..take])
                .map_err(|e| DownloadError::disk(&e))?;
            downloaded += take as u64;
            job.counter.store(downloaded, Ordering::Release);
        }
        if take < chunk.len() {
            tracing::debug!(segment = segment.index, "server over-delivered; stopping early");
            drop(rx);
            engine_task.abort();
            return Ok(());
        }
    }

    // The stream ended; the engine's verdict decides between success and
    // transport failure.
    match engine_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e),
        Err(join_err) if join_err.is_cancelled() => return Err(DownloadError::Canceled),
        Err(join_err) => {
            return Err(DownloadError::Unknown(format!(
                "transport task failed: {join_err}"
            )))
        }
    }

    if !segment.is_open_ended() && downloaded < total {
        return Err(DownloadError::Network("connection closed prematurely".into()));
    }
    Ok(())
}
