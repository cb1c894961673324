//! Concurrent segmented fetching for one task.
//!
//! Runs one worker per incomplete segment, aggregates their progress, and
//! honors live connection-count changes by cancelling the in-flight batch,
//! snapshotting per-segment progress, re-planning, and starting over. The
//! batch loop ends when every segment is complete or an error or
//! cancellation wins.

mod worker;

use crate::error::DownloadError;
use crate::http::HttpEngine;
use crate::limiter::LimiterPair;
use crate::model::DownloadState;
use crate::progress::{Progress, ProgressClock};
use crate::segment::{self, Segment};
use crate::storage::FileWriter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Why a batch stopped.
enum BatchOutcome {
    AllDone,
    Canceled,
    Resegment(u32),
    Error(DownloadError),
}

/// Drives the segment workers for one download attempt.
pub struct SegmentedFetcher {
    engine: Arc<dyn HttpEngine>,
    writer: FileWriter,
    limiters: LimiterPair,
    read_timeout: Duration,
    progress_interval: Duration,
}

impl SegmentedFetcher {
    pub fn new(
        engine: Arc<dyn HttpEngine>,
        writer: FileWriter,
        limiters: LimiterPair,
        read_timeout: Duration,
        progress_interval: Duration,
    ) -> Self {
        Self {
            engine,
            writer,
            limiters,
            read_timeout,
            progress_interval,
        }
    }

    /// Fetch every incomplete segment, mutating `segments` in place so the
    /// caller can persist progress whether this returns `Ok`, an error for
    /// the retry layer, or `Canceled`.
    ///
    /// `connections` is the live requested connection count; a change mid
    /// flight triggers re-segmentation. Progress and segment snapshots are
    /// published through the two watch senders, throttled to the progress
    /// interval with a final emit before returning.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        segments: &mut Vec<Segment>,
        total: Option<u64>,
        use_ranges: bool,
        connections: &mut watch::Receiver<u32>,
        cancel: &CancellationToken,
        state_tx: &watch::Sender<DownloadState>,
        segments_tx: &watch::Sender<Vec<Segment>>,
    ) -> Result<(), DownloadError> {
        let mut clock = ProgressClock::new(self.progress_interval);
        let mut current_k = *connections.borrow_and_update();

        loop {
            if segment::all_complete(segments) {
                self.publish_final(&mut clock, segments, total, state_tx, segments_tx);
                return Ok(());
            }

            let batch_cancel = cancel.child_token();
            let counters: Vec<Arc<AtomicU64>> = segments
                .iter()
                .map(|s| Arc::new(AtomicU64::new(s.downloaded_bytes)))
                .collect();

            let mut join: JoinSet<(usize, Result<(), DownloadError>)> = JoinSet::new();
            for (i, seg) in segments.iter().enumerate() {
                if seg.is_complete() {
                    continue;
                }
                join.spawn(worker::fetch_segment(worker::SegmentJob {
                    engine: Arc::clone(&self.engine),
                    writer: self.writer.clone(),
                    limiters: self.limiters.clone(),
                    url: url.to_string(),
                    headers: headers.clone(),
                    segment: *seg,
                    use_ranges,
                    counter: Arc::clone(&counters[i]),
                    cancel: batch_cancel.clone(),
                    read_timeout: self.read_timeout,
                }));
            }

            let outcome = self
                .drive_batch(
                    &mut join,
                    connections,
                    cancel,
                    current_k,
                    segments,
                    &counters,
                    total,
                    &mut clock,
                    state_tx,
                    segments_tx,
                )
                .await;

            // Stop the stragglers and fold their progress back in before
            // deciding anything else.
            batch_cancel.cancel();
            while join.join_next().await.is_some() {}
            for (seg, counter) in segments.iter_mut().zip(&counters) {
                seg.downloaded_bytes = counter.load(Ordering::Acquire);
            }

            match outcome {
                BatchOutcome::AllDone => {
                    finish_open_ended(segments);
                    self.publish_final(&mut clock, segments, total, state_tx, segments_tx);
                    return Ok(());
                }
                BatchOutcome::Canceled => {
                    self.publish_final(&mut clock, segments, total, state_tx, segments_tx);
                    return Err(DownloadError::Canceled);
                }
                BatchOutcome::Resegment(new_k) => {
                    *segments = segment::resegment(segments, new_k);
                    current_k = new_k;
                    let _ = segments_tx.send(segments.clone());
                    tracing::debug!(new_k, "re-segmented after connection change");
                }
                BatchOutcome::Error(e) => {
                    self.publish_final(&mut clock, segments, total, state_tx, segments_tx);
                    return Err(e);
                }
            }
        }
    }

    /// Waits for the current batch to finish while watching for cancellation,
    /// connection-count changes, and the progress tick.
    #[allow(clippy::too_many_arguments)]
    async fn drive_batch(
        &self,
        join: &mut JoinSet<(usize, Result<(), DownloadError>)>,
        connections: &mut watch::Receiver<u32>,
        cancel: &CancellationToken,
        current_k: u32,
        base: &[Segment],
        counters: &[Arc<AtomicU64>],
        total: Option<u64>,
        clock: &mut ProgressClock,
        state_tx: &watch::Sender<DownloadState>,
        segments_tx: &watch::Sender<Vec<Segment>>,
    ) -> BatchOutcome {
        let mut tick = tokio::time::interval(self.progress_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut connections_open = true;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return BatchOutcome::Canceled,

                changed = connections.changed(), if connections_open => {
                    match changed {
                        Ok(()) => {
                            let new_k = *connections.borrow_and_update();
                            if new_k >= 1 && new_k != current_k {
                                return BatchOutcome::Resegment(new_k);
                            }
                        }
                        // Sender gone: the connection count can no longer change.
                        Err(_) => connections_open = false,
                    }
                }

                joined = join.join_next() => match joined {
                    None => return BatchOutcome::AllDone,
                    Some(Ok((_, Ok(())))) => {}
                    Some(Ok((index, Err(e)))) => {
                        tracing::debug!(segment = index, error = %e, "segment failed");
                        return BatchOutcome::Error(e);
                    }
                    Some(Err(join_err)) => {
                        return BatchOutcome::Error(DownloadError::Unknown(format!(
                            "segment worker panicked: {join_err}"
                        )));
                    }
                },

                _ = tick.tick() => {
                    let downloaded: u64 =
                        counters.iter().map(|c| c.load(Ordering::Acquire)).sum();
                    if let Some(progress) = clock.observe(downloaded, total) {
                        let _ = state_tx.send(DownloadState::Downloading(progress));
                        let snapshot: Vec<Segment> = base
                            .iter()
                            .zip(counters)
                            .map(|(seg, counter)| {
                                let mut s = *seg;
                                s.downloaded_bytes = counter.load(Ordering::Acquire);
                                s
                            })
                            .collect();
                        let _ = segments_tx.send(snapshot);
                    }
                }
            }
        }
    }

    fn publish_final(
        &self,
        clock: &mut ProgressClock,
        segments: &[Segment],
        total: Option<u64>,
        state_tx: &watch::Sender<DownloadState>,
        segments_tx: &watch::Sender<Vec<Segment>>,
    ) {
        let progress = clock.flush(segment::downloaded_total(segments), total);
        let _ = state_tx.send(DownloadState::Downloading(progress));
        let _ = segments_tx.send(segments.to_vec());
    }

    /// Aggregate progress helper for callers.
    pub fn progress_of(segments: &[Segment], total: Option<u64>) -> Progress {
        Progress::new(segment::downloaded_total(segments), total)
    }
}

/// A completed open-ended stream finally has a known length; close the
/// sentinel so the segment reads as complete.
fn finish_open_ended(segments: &mut Vec<Segment>) {
    if segments.len() == 1 && segments[0].is_open_ended() {
        let seg = &mut segments[0];
        if seg.downloaded_bytes == 0 {
            // Empty body: nothing left to represent.
            segments.clear();
        } else {
            seg.end = seg.start + seg.downloaded_bytes - 1;
        }
    }
}

#[cfg(test)]
mod tests;
