//! Download error taxonomy.
//!
//! Every failure the engine can surface is one of these variants; the retry
//! layer classifies them and the store persists the terminal one as a
//! `{kind, message}` pair.

use serde::{Deserialize, Serialize};

/// Error surfaced by the engine for a single task.
///
/// Variants carry owned strings so the error can be cloned into the reactive
/// state cell and persisted after the task is gone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownloadError {
    /// Transport failed: DNS, TLS, connection reset, short read, timeout.
    #[error("network: {0}")]
    Network(String),
    /// Server answered with a non-2xx status.
    #[error("http {status}: {message}")]
    Http {
        status: u16,
        message: String,
        /// Parsed `Retry-After` seconds, when the server sent one (429/503).
        retry_after: Option<u64>,
    },
    /// Write, flush, or preallocate failed.
    #[error("disk: {message}")]
    Disk { message: String, transient: bool },
    /// User requested cancellation. Never retried.
    #[error("canceled")]
    Canceled,
    /// No source handler for the URL, or the server lacks a required capability.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Remote validators changed and the task could not be restarted.
    #[error("validation: {0}")]
    Validation(String),
    /// Fallback for everything else.
    #[error("unknown: {0}")]
    Unknown(String),
}

impl DownloadError {
    /// Serialized tag for the persisted record.
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadError::Network(_) => "network",
            DownloadError::Http { .. } => "http",
            DownloadError::Disk { .. } => "disk",
            DownloadError::Canceled => "canceled",
            DownloadError::Unsupported(_) => "unsupported",
            DownloadError::Validation(_) => "validation",
            DownloadError::Unknown(_) => "unknown",
        }
    }

    /// Plain HTTP error without a Retry-After hint.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        DownloadError::Http {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Wrap an I/O error from the file writer. `ENOSPC` and permission
    /// failures are terminal; interrupted/timed-out writes may be retried.
    pub fn disk(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        let transient = matches!(
            err.kind(),
            ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock
        );
        DownloadError::Disk {
            message: err.to_string(),
            transient,
        }
    }
}

/// Persisted form of a terminal error: `{kind, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl From<&DownloadError> for ErrorInfo {
    fn from(e: &DownloadError) -> Self {
        ErrorInfo {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

impl ErrorInfo {
    /// Rebuild a best-effort `DownloadError` from a persisted record.
    pub fn to_error(&self) -> DownloadError {
        match self.kind.as_str() {
            "network" => DownloadError::Network(self.message.clone()),
            "http" => DownloadError::http(0, self.message.clone()),
            "disk" => DownloadError::Disk {
                message: self.message.clone(),
                transient: false,
            },
            "canceled" => DownloadError::Canceled,
            "unsupported" => DownloadError::Unsupported(self.message.clone()),
            "validation" => DownloadError::Validation(self.message.clone()),
            _ => DownloadError::Unknown(self.message.clone()),
        }
    }
}
