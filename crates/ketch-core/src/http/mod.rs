//! Abstract HTTP wire transport.
//!
//! The engine consumes two operations: a metadata probe and a streaming
//! fetch. Implementations own redirects, TLS, and header plumbing; the core
//! never parses HTTP itself.

mod curl_engine;

pub use curl_engine::CurlHttpEngine;

use crate::error::DownloadError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Inclusive byte range for a fetch; `end = None` means "to end of file".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn closed(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn open(start: u64) -> Self {
        Self { start, end: None }
    }

    /// `Range` header value: `bytes=start-end` (inclusive) or `bytes=start-`.
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// What a probe learned about the remote resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// Total size in bytes, when the server sent `Content-Length`.
    pub content_length: Option<u64>,
    /// True when the server advertised `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Raw `Content-Disposition` value, used as a filename hint.
    pub content_disposition: Option<String>,
}

/// Transport contract consumed by the prober and the segmented fetcher.
///
/// `fetch` must deliver contiguous bytes in order through `sink` and return
/// only once the stream ends; a closed sink means the caller lost interest
/// and the implementation should stop and return `Canceled`. Short reads are
/// not the engine's concern: the fetcher detects them by byte count.
#[async_trait]
pub trait HttpEngine: Send + Sync + 'static {
    async fn probe(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<ServerInfo, DownloadError>;

    async fn fetch(
        &self,
        url: &str,
        range: Option<ByteRange>,
        headers: &HashMap<String, String>,
        sink: mpsc::Sender<Bytes>,
    ) -> Result<(), DownloadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_header_values() {
        assert_eq!(ByteRange::closed(0, 99).header_value(), "bytes=0-99");
        assert_eq!(ByteRange::closed(42, 42).header_value(), "bytes=42-42");
        assert_eq!(ByteRange::open(600_000).header_value(), "bytes=600000-");
    }
}
