//! Source-capability probing.
//!
//! Asks the transport what the remote resource looks like (size, byte-range
//! support, validators) and normalizes the answer. Network-class failures
//! are retried under the shared policy before surfacing.

use crate::error::DownloadError;
use crate::http::{HttpEngine, ServerInfo};
use crate::retry::{RetryDecision, RetryPolicy};
use std::collections::HashMap;
use std::sync::Arc;

/// Probes a URL through the [`HttpEngine`] with retry.
pub struct RangeProber {
    engine: Arc<dyn HttpEngine>,
    policy: RetryPolicy,
}

impl RangeProber {
    pub fn new(engine: Arc<dyn HttpEngine>, policy: RetryPolicy) -> Self {
        Self { engine, policy }
    }

    /// Probe with retry. A 2xx without Content-Length and without
    /// `Accept-Ranges: bytes` comes back as `{None, false, ..}` which puts
    /// the caller in single-segment mode.
    pub async fn probe(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<ServerInfo, DownloadError> {
        let mut attempt = 0u32;
        loop {
            match self.engine.probe(url, headers).await {
                Ok(info) => return Ok(normalize(info)),
                Err(e) => {
                    attempt += 1;
                    match self.policy.decide(attempt, &e) {
                        RetryDecision::NoRetry => return Err(e),
                        RetryDecision::RetryAfter(delay) => {
                            tracing::debug!(url, attempt, ?delay, error = %e, "probe retry");
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }
    }
}

/// Empty or whitespace validators carry no information; drop them.
fn normalize(mut info: ServerInfo) -> ServerInfo {
    info.etag = info.etag.filter(|s| !s.trim().is_empty());
    info.last_modified = info.last_modified.filter(|s| !s.trim().is_empty());
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ByteRange;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    /// Probe stub that fails `failures` times with a network error, then
    /// returns the canned info.
    struct FlakyProbe {
        failures: AtomicU32,
        info: ServerInfo,
    }

    #[async_trait]
    impl HttpEngine for FlakyProbe {
        async fn probe(
            &self,
            _url: &str,
            _headers: &HashMap<String, String>,
        ) -> Result<ServerInfo, DownloadError> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }).is_ok()
            {
                return Err(DownloadError::Network("flaky".into()));
            }
            Ok(self.info.clone())
        }

        async fn fetch(
            &self,
            _url: &str,
            _range: Option<ByteRange>,
            _headers: &HashMap<String, String>,
            _sink: mpsc::Sender<Bytes>,
        ) -> Result<(), DownloadError> {
            unimplemented!("probe-only stub")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_network_failures_then_succeeds() {
        let engine = Arc::new(FlakyProbe {
            failures: AtomicU32::new(2),
            info: ServerInfo {
                content_length: Some(1000),
                accept_ranges: true,
                ..ServerInfo::default()
            },
        });
        let prober = RangeProber::new(engine, RetryPolicy::default());
        let info = prober.probe("http://x/", &HashMap::new()).await.unwrap();
        assert_eq!(info.content_length, Some(1000));
        assert!(info.accept_ranges);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_network_error() {
        let engine = Arc::new(FlakyProbe {
            failures: AtomicU32::new(100),
            info: ServerInfo::default(),
        });
        let prober = RangeProber::new(
            engine,
            RetryPolicy::new(2, std::time::Duration::from_millis(10)),
        );
        let err = prober.probe("http://x/", &HashMap::new()).await.unwrap_err();
        assert_eq!(err.kind(), "network");
    }

    #[tokio::test(start_paused = true)]
    async fn blank_validators_normalize_to_none() {
        let engine = Arc::new(FlakyProbe {
            failures: AtomicU32::new(0),
            info: ServerInfo {
                content_length: None,
                accept_ranges: false,
                etag: Some("   ".into()),
                last_modified: Some(String::new()),
                content_disposition: None,
            },
        });
        let prober = RangeProber::new(engine, RetryPolicy::default());
        let info = prober.probe("http://x/", &HashMap::new()).await.unwrap();
        assert_eq!(info.etag, None);
        assert_eq!(info.last_modified, None);
        assert_eq!(info.content_length, None);
        assert!(!info.accept_ranges);
    }
}
