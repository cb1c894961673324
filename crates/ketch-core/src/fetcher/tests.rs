//! Fetcher tests against an in-memory engine serving deterministic bytes.

use super::*;
use crate::http::{ByteRange, ServerInfo};
use crate::limiter::SpeedLimiter;
use crate::model::DownloadState;
use crate::storage::FileWriterBuilder;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// In-memory transport serving a fixed body with optional chunk delay and a
/// simulated early connection close at an absolute offset.
struct MemoryEngine {
    body: Vec<u8>,
    chunk: usize,
    delay: Duration,
    truncate_at: Option<u64>,
}

impl MemoryEngine {
    fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            chunk: 1024,
            delay: Duration::ZERO,
            truncate_at: None,
        }
    }
}

#[async_trait]
impl HttpEngine for MemoryEngine {
    async fn probe(
        &self,
        _url: &str,
        _headers: &HashMap<String, String>,
    ) -> Result<ServerInfo, DownloadError> {
        Ok(ServerInfo {
            content_length: Some(self.body.len() as u64),
            accept_ranges: true,
            etag: Some("mem-1".into()),
            ..ServerInfo::default()
        })
    }

    async fn fetch(
        &self,
        _url: &str,
        range: Option<ByteRange>,
        _headers: &HashMap<String, String>,
        sink: mpsc::Sender<Bytes>,
    ) -> Result<(), DownloadError> {
        let len = self.body.len() as u64;
        if len == 0 {
            return Ok(());
        }
        let (start, end) = match range {
            Some(r) => (r.start, r.end.unwrap_or(len - 1).min(len - 1)),
            None => (0, len - 1),
        };
        if start > end {
            return Ok(());
        }
        let stop = self.truncate_at.unwrap_or(u64::MAX);
        let mut pos = start;
        while pos <= end {
            if pos >= stop {
                // Simulated mid-stream connection close.
                return Ok(());
            }
            let until = (end + 1).min(stop);
            let take = ((until - pos) as usize).min(self.chunk);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let chunk = Bytes::copy_from_slice(&self.body[pos as usize..pos as usize + take]);
            if sink.send(chunk).await.is_err() {
                return Err(DownloadError::Canceled);
            }
            pos += take as u64;
        }
        Ok(())
    }
}

fn test_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31).wrapping_add(7) % 256) as u8).collect()
}

struct Harness {
    fetcher: SegmentedFetcher,
    connections_tx: watch::Sender<u32>,
    connections_rx: watch::Receiver<u32>,
    state_tx: watch::Sender<DownloadState>,
    state_rx: watch::Receiver<DownloadState>,
    segments_tx: watch::Sender<Vec<Segment>>,
    writer: FileWriter,
}

fn harness(engine: MemoryEngine, part: &std::path::Path, total: u64, k: u32) -> Harness {
    let mut builder = FileWriterBuilder::create(part).unwrap();
    builder.preallocate(total).unwrap();
    let writer = builder.build();
    let (connections_tx, connections_rx) = watch::channel(k);
    let (state_tx, state_rx) = watch::channel(DownloadState::Idle);
    let (segments_tx, _) = watch::channel(Vec::new());
    Harness {
        fetcher: SegmentedFetcher::new(
            Arc::new(engine),
            writer.clone(),
            LimiterPair::new(SpeedLimiter::unlimited(), SpeedLimiter::unlimited()),
            Duration::from_secs(5),
            Duration::from_millis(10),
        ),
        connections_tx,
        connections_rx,
        state_tx,
        state_rx,
        segments_tx,
        writer,
    }
}

#[tokio::test]
async fn multi_segment_download_is_byte_exact() {
    let body = test_body(100_000);
    let dir = tempfile::tempdir().unwrap();
    let part = dir.path().join("a.part");
    let mut h = harness(MemoryEngine::new(body.clone()), &part, 100_000, 4);

    let mut segments = segment::plan(100_000, 4);
    let cancel = CancellationToken::new();
    h.fetcher
        .run(
            "mem://a",
            &HashMap::new(),
            &mut segments,
            Some(100_000),
            true,
            &mut h.connections_rx,
            &cancel,
            &h.state_tx,
            &h.segments_tx,
        )
        .await
        .unwrap();

    assert!(segment::all_complete(&segments));
    assert_eq!(segment::downloaded_total(&segments), 100_000);
    let out = dir.path().join("a.bin");
    h.writer.finalize(&out).unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), body);
}

#[tokio::test]
async fn short_read_errors_then_resume_completes() {
    let body = test_body(100_000);
    let dir = tempfile::tempdir().unwrap();
    let part = dir.path().join("b.part");

    let mut faulty = MemoryEngine::new(body.clone());
    faulty.truncate_at = Some(60_000);
    let mut h = harness(faulty, &part, 100_000, 4);

    let mut segments = segment::plan(100_000, 4);
    let cancel = CancellationToken::new();
    let err = h
        .fetcher
        .run(
            "mem://b",
            &HashMap::new(),
            &mut segments,
            Some(100_000),
            true,
            &mut h.connections_rx,
            &cancel,
            &h.state_tx,
            &h.segments_tx,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "network");
    let partial = segment::downloaded_total(&segments);
    assert!(partial > 0 && partial < 100_000, "partial={partial}");

    // Same writer and segment list, healthy engine: the retry picks up where
    // the fault stopped and every byte lands once.
    let fetcher = SegmentedFetcher::new(
        Arc::new(MemoryEngine::new(body.clone())),
        h.writer.clone(),
        LimiterPair::new(SpeedLimiter::unlimited(), SpeedLimiter::unlimited()),
        Duration::from_secs(5),
        Duration::from_millis(10),
    );
    fetcher
        .run(
            "mem://b",
            &HashMap::new(),
            &mut segments,
            Some(100_000),
            true,
            &mut h.connections_rx,
            &cancel,
            &h.state_tx,
            &h.segments_tx,
        )
        .await
        .unwrap();

    assert!(segment::all_complete(&segments));
    let out = dir.path().join("b.bin");
    h.writer.finalize(&out).unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), body);
}

#[tokio::test(start_paused = true)]
async fn connection_change_resegments_and_stays_byte_exact() {
    let body = test_body(100_000);
    let dir = tempfile::tempdir().unwrap();
    let part = dir.path().join("c.part");

    let mut engine = MemoryEngine::new(body.clone());
    engine.delay = Duration::from_millis(1);
    let h = harness(engine, &part, 100_000, 2);
    let Harness {
        fetcher,
        connections_tx,
        mut connections_rx,
        state_tx,
        mut state_rx,
        segments_tx,
        writer,
    } = h;

    let run = tokio::spawn(async move {
        let mut segments = segment::plan(100_000, 2);
        let cancel = CancellationToken::new();
        let result = fetcher
            .run(
                "mem://c",
                &HashMap::new(),
                &mut segments,
                Some(100_000),
                true,
                &mut connections_rx,
                &cancel,
                &state_tx,
                &segments_tx,
            )
            .await;
        (result, segments)
    });

    // Observe progress while the download runs; values must never go back.
    let observer = tokio::spawn(async move {
        let mut seen: Vec<u64> = Vec::new();
        while state_rx.changed().await.is_ok() {
            if let DownloadState::Downloading(p) = &*state_rx.borrow() {
                seen.push(p.downloaded);
            }
        }
        seen
    });

    // Let the two-connection batch make some progress, then ask for eight.
    tokio::time::sleep(Duration::from_millis(20)).await;
    connections_tx.send(8).unwrap();

    let (result, segments) = run.await.unwrap();
    result.unwrap();
    assert_eq!(segments.len(), 8, "new plan should have eight entries");
    assert!(segment::all_complete(&segments));
    assert_eq!(segment::downloaded_total(&segments), 100_000);

    let seen = observer.await.unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress regressed: {seen:?}");

    let out = dir.path().join("c.bin");
    writer.finalize(&out).unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), body);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_the_batch_and_keeps_progress() {
    let body = test_body(100_000);
    let dir = tempfile::tempdir().unwrap();
    let part = dir.path().join("d.part");

    let mut engine = MemoryEngine::new(body);
    engine.delay = Duration::from_millis(1);
    let h = harness(engine, &part, 100_000, 4);
    let Harness {
        fetcher,
        mut connections_rx,
        state_tx,
        segments_tx,
        ..
    } = h;

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    let run = tokio::spawn(async move {
        let mut segments = segment::plan(100_000, 4);
        let result = fetcher
            .run(
                "mem://d",
                &HashMap::new(),
                &mut segments,
                Some(100_000),
                true,
                &mut connections_rx,
                &cancel,
                &state_tx,
                &segments_tx,
            )
            .await;
        (result, segments)
    });

    tokio::time::sleep(Duration::from_millis(15)).await;
    canceller.cancel();

    let (result, segments) = run.await.unwrap();
    assert_eq!(result.unwrap_err(), DownloadError::Canceled);
    let partial = segment::downloaded_total(&segments);
    assert!(partial > 0 && partial < 100_000, "partial={partial}");
}

#[tokio::test]
async fn single_segment_without_ranges_downloads_everything() {
    let body = test_body(32_768);
    let dir = tempfile::tempdir().unwrap();
    let part = dir.path().join("e.part");
    let mut h = harness(MemoryEngine::new(body.clone()), &part, 32_768, 1);

    let mut segments = segment::single(Some(32_768));
    let cancel = CancellationToken::new();
    h.fetcher
        .run(
            "mem://e",
            &HashMap::new(),
            &mut segments,
            Some(32_768),
            false,
            &mut h.connections_rx,
            &cancel,
            &h.state_tx,
            &h.segments_tx,
        )
        .await
        .unwrap();

    assert!(segment::all_complete(&segments));
    let out = dir.path().join("e.bin");
    h.writer.finalize(&out).unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), body);
}

#[tokio::test]
async fn open_ended_stream_closes_segment_at_actual_size() {
    let body = test_body(4_000);
    let dir = tempfile::tempdir().unwrap();
    let part = dir.path().join("f.part");
    let mut h = harness(MemoryEngine::new(body.clone()), &part, 0, 1);

    let mut segments = segment::single(None);
    let cancel = CancellationToken::new();
    h.fetcher
        .run(
            "mem://f",
            &HashMap::new(),
            &mut segments,
            None,
            true,
            &mut h.connections_rx,
            &cancel,
            &h.state_tx,
            &h.segments_tx,
        )
        .await
        .unwrap();

    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].end, 3_999);
    assert!(segment::all_complete(&segments));
}
