//! Token-bucket rate limiting for download streams.
//!
//! One limiter per task plus one shared global limiter; both are acquired
//! before every write, global first. The convention matters only for
//! consistency: the two buckets are independent, so either order is correct.

use crate::model::SpeedLimit;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Async token bucket. Capacity equals the configured rate, refilled
/// continuously, so the burst window is at most one second of budget.
/// `acquire` suspends until enough tokens accumulate; an `Unlimited` limiter
/// is a no-op. Limit changes take effect on the next `acquire`.
#[derive(Debug, Clone)]
pub struct SpeedLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    /// Bytes per second; 0 means unlimited.
    limit: AtomicU64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    available: f64,
    refilled_at: Instant,
}

impl SpeedLimiter {
    pub fn new(limit: SpeedLimit) -> Self {
        Self {
            inner: Arc::new(Inner {
                limit: AtomicU64::new(limit.bytes_per_sec().unwrap_or(0)),
                bucket: Mutex::new(Bucket {
                    available: 0.0,
                    refilled_at: Instant::now(),
                }),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(SpeedLimit::Unlimited)
    }

    pub fn set_limit(&self, limit: SpeedLimit) {
        self.inner
            .limit
            .store(limit.bytes_per_sec().unwrap_or(0), Ordering::Relaxed);
    }

    pub fn limit(&self) -> SpeedLimit {
        match self.inner.limit.load(Ordering::Relaxed) {
            0 => SpeedLimit::Unlimited,
            n => SpeedLimit::BytesPerSec(n),
        }
    }

    /// Take `bytes` tokens, suspending until they are available. A request
    /// larger than one second of budget is clamped to the bucket capacity so
    /// a single oversized network read cannot deadlock the stream.
    pub async fn acquire(&self, bytes: usize) {
        loop {
            let rate = self.inner.limit.load(Ordering::Relaxed);
            if rate == 0 || bytes == 0 {
                return;
            }
            let cap = rate as f64;
            let need = (bytes as f64).min(cap);

            let wait = {
                let mut bucket = self.inner.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.saturating_duration_since(bucket.refilled_at).as_secs_f64();
                bucket.available = (bucket.available + elapsed * cap).min(cap);
                bucket.refilled_at = now;

                if bucket.available >= need {
                    bucket.available -= need;
                    return;
                }
                std::time::Duration::from_secs_f64((need - bucket.available) / cap)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// The global and per-task limiters for one download, acquired in a fixed
/// order before each write.
#[derive(Debug, Clone)]
pub struct LimiterPair {
    pub global: SpeedLimiter,
    pub task: SpeedLimiter,
}

impl LimiterPair {
    pub fn new(global: SpeedLimiter, task: SpeedLimiter) -> Self {
        Self { global, task }
    }

    /// Global first, then the task limiter.
    pub async fn acquire(&self, bytes: usize) {
        self.global.acquire(bytes).await;
        self.task.acquire(bytes).await;
    }
}
