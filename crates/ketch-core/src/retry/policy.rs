//! Exponential backoff with jitter.

use super::classify::{classify, ErrorKind};
use crate::error::DownloadError;
use rand::Rng;
use std::time::Duration;

/// Decision for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Bounded exponential backoff: `base_delay * 2^(attempt-1)` capped at
/// `max_delay`, with ±20% jitter. `max_retries` bounds attempts per unit of
/// forward progress; the caller resets its counter whenever bytes land.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// Decide what to do after failure number `attempt` (1-based).
    ///
    /// A parseable `Retry-After` on a throttling response overrides the
    /// computed delay (still capped at `max_delay`).
    pub fn decide(&self, attempt: u32, error: &DownloadError) -> RetryDecision {
        let kind = classify(error);
        if !kind.is_retryable() || attempt > self.max_retries {
            return RetryDecision::NoRetry;
        }

        if kind == ErrorKind::Throttled {
            if let DownloadError::Http {
                retry_after: Some(secs),
                ..
            } = error
            {
                let hinted = Duration::from_secs(*secs).min(self.max_delay);
                return RetryDecision::RetryAfter(hinted);
            }
        }

        let exp = 1u32 << attempt.saturating_sub(1).min(16);
        let raw = self.base_delay.saturating_mul(exp).min(self.max_delay);
        RetryDecision::RetryAfter(jitter(raw))
    }
}

/// ±20% uniform jitter.
fn jitter(d: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..=1.2);
    d.mul_f64(factor)
}
