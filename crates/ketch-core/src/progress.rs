//! Throttled progress aggregation and byte-rate estimation.

use std::time::Duration;
use tokio::time::Instant;

/// Snapshot of download progress for one task.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Progress {
    /// Bytes written so far, across all segments.
    pub downloaded: u64,
    /// Total file size, when known.
    pub total: Option<u64>,
    /// Smoothed download rate in bytes per second.
    pub bytes_per_sec: f64,
}

impl Progress {
    pub fn new(downloaded: u64, total: Option<u64>) -> Self {
        Self {
            downloaded,
            total,
            bytes_per_sec: 0.0,
        }
    }

    /// Estimated seconds remaining (`None` when the rate or total is unknown).
    pub fn eta_secs(&self) -> Option<f64> {
        let total = self.total?;
        let remaining = total.saturating_sub(self.downloaded);
        if remaining == 0 {
            return Some(0.0);
        }
        if self.bytes_per_sec <= 0.0 {
            return None;
        }
        Some(remaining as f64 / self.bytes_per_sec)
    }

    /// Fraction complete in [0.0, 1.0]; 1.0 when the total is unknown but the
    /// stream has ended is the caller's concern.
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total?;
        if total == 0 {
            return Some(1.0);
        }
        Some((self.downloaded as f64 / total as f64).min(1.0))
    }
}

/// Rate-limits progress notifications and keeps an EWMA byte rate.
///
/// `observe` returns a snapshot at most once per interval; `flush` always
/// returns one so terminal transitions never lose the last value.
#[derive(Debug)]
pub struct ProgressClock {
    interval: Duration,
    last_emit: Option<Instant>,
    last_sample: Option<(Instant, u64)>,
    rate_ewma: f64,
}

impl ProgressClock {
    const ALPHA: f64 = 0.2;

    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            last_sample: None,
            rate_ewma: 0.0,
        }
    }

    fn sample(&mut self, downloaded: u64) {
        let now = Instant::now();
        if let Some((at, bytes)) = self.last_sample {
            let dt = now.saturating_duration_since(at).as_secs_f64();
            if dt > 0.0 {
                let inst = downloaded.saturating_sub(bytes) as f64 / dt;
                self.rate_ewma = self.rate_ewma * (1.0 - Self::ALPHA) + inst * Self::ALPHA;
            }
        }
        self.last_sample = Some((now, downloaded));
    }

    /// Throttled observation: returns `Some` when at least one interval has
    /// elapsed since the last emission.
    pub fn observe(&mut self, downloaded: u64, total: Option<u64>) -> Option<Progress> {
        let now = Instant::now();
        if let Some(last) = self.last_emit {
            if now.saturating_duration_since(last) < self.interval {
                return None;
            }
        }
        self.sample(downloaded);
        self.last_emit = Some(now);
        Some(Progress {
            downloaded,
            total,
            bytes_per_sec: self.rate_ewma,
        })
    }

    /// Unthrottled observation for terminal events.
    pub fn flush(&mut self, downloaded: u64, total: Option<u64>) -> Progress {
        self.sample(downloaded);
        self.last_emit = Some(Instant::now());
        Progress {
            downloaded,
            total,
            bytes_per_sec: self.rate_ewma,
        }
    }
}
