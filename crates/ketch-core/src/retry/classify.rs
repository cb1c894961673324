//! Map download errors onto retryability classes.

use crate::error::DownloadError;

/// Coarse classification of an error for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport failure or request timeout; retry with backoff.
    Network,
    /// Server asked us to slow down (429, or 503 with Retry-After).
    Throttled,
    /// Retryable server-side failure (5xx).
    ServerError,
    /// Transient disk failure.
    Disk,
    /// Everything else; never retried.
    Fatal,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Fatal)
    }
}

/// Classify a download error.
///
/// Retryable: network-class failures, HTTP 408, 429, and 5xx, and transient
/// disk errors. Everything else (other 4xx, terminal disk errors,
/// cancellation, unsupported, validation) is fatal.
pub fn classify(error: &DownloadError) -> ErrorKind {
    match error {
        DownloadError::Network(_) => ErrorKind::Network,
        DownloadError::Http { status, .. } => match *status {
            408 => ErrorKind::Network,
            429 => ErrorKind::Throttled,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::Fatal,
        },
        DownloadError::Disk { transient, .. } => {
            if *transient {
                ErrorKind::Disk
            } else {
                ErrorKind::Fatal
            }
        }
        DownloadError::Canceled
        | DownloadError::Unsupported(_)
        | DownloadError::Validation(_)
        | DownloadError::Unknown(_) => ErrorKind::Fatal,
    }
}
