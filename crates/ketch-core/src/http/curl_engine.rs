//! Production transport: libcurl easy handles driven from `spawn_blocking`.
//!
//! Each fetch runs a blocking transfer on the blocking pool and streams body
//! chunks to the async side over the caller's channel. Probes are HEAD
//! requests with a one-byte ranged-GET fallback for servers that block HEAD.

use super::{ByteRange, HttpEngine, ServerInfo};
use crate::error::DownloadError;
use async_trait::async_trait;
use bytes::Bytes;
use std::cell::Cell;
use std::collections::HashMap;
use std::str;
use std::time::Duration;
use tokio::sync::mpsc;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
/// Cap on how much of an error response body is kept for the message.
const ERROR_BODY_CAP: usize = 4096;

/// libcurl-backed [`HttpEngine`].
#[derive(Debug, Clone, Default)]
pub struct CurlHttpEngine {
    _private: (),
}

impl CurlHttpEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpEngine for CurlHttpEngine {
    async fn probe(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<ServerInfo, DownloadError> {
        let url = url.to_string();
        let headers = headers.clone();
        tokio::task::spawn_blocking(move || probe_blocking(&url, &headers))
            .await
            .map_err(|e| DownloadError::Unknown(format!("probe task join: {e}")))?
    }

    async fn fetch(
        &self,
        url: &str,
        range: Option<ByteRange>,
        headers: &HashMap<String, String>,
        sink: mpsc::Sender<Bytes>,
    ) -> Result<(), DownloadError> {
        let url = url.to_string();
        let headers = headers.clone();
        tokio::task::spawn_blocking(move || fetch_blocking(&url, range, &headers, sink))
            .await
            .map_err(|e| DownloadError::Unknown(format!("fetch task join: {e}")))?
    }
}

fn probe_blocking(
    url: &str,
    headers: &HashMap<String, String>,
) -> Result<ServerInfo, DownloadError> {
    match head_probe(url, headers) {
        // Some servers block HEAD outright; learn the metadata from a
        // one-byte ranged GET instead.
        Err(DownloadError::Http {
            status: 405 | 501, ..
        }) => range_probe(url, headers),
        other => other,
    }
}

fn head_probe(url: &str, headers: &HashMap<String, String>) -> Result<ServerInfo, DownloadError> {
    let mut easy = new_easy(url, headers)?;
    easy.nobody(true).map_err(curl_to_error)?;
    easy.timeout(PROBE_TIMEOUT).map_err(curl_to_error)?;

    let mut lines: Vec<String> = Vec::new();
    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    lines.push(s.trim_end().to_string());
                }
                true
            })
            .map_err(curl_to_error)?;
        transfer.perform().map_err(curl_to_error)?;
    }

    let code = easy.response_code().map_err(curl_to_error)? as u16;
    if !(200..300).contains(&code) {
        return Err(DownloadError::http(code, format!("probe returned HTTP {code}")));
    }
    Ok(parse_server_info(&lines))
}

/// Probe via `GET` with `Range: bytes=0-0`. A 206 proves range support and
/// `Content-Range` carries the total size.
fn range_probe(url: &str, headers: &HashMap<String, String>) -> Result<ServerInfo, DownloadError> {
    let mut easy = new_easy(url, headers)?;
    easy.range("0-0").map_err(curl_to_error)?;
    easy.timeout(PROBE_TIMEOUT).map_err(curl_to_error)?;

    let mut lines: Vec<String> = Vec::new();
    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    lines.push(s.trim_end().to_string());
                }
                true
            })
            .map_err(curl_to_error)?;
        transfer
            .write_function(|data| Ok(data.len()))
            .map_err(curl_to_error)?;
        transfer.perform().map_err(curl_to_error)?;
    }

    let code = easy.response_code().map_err(curl_to_error)? as u16;
    if !(200..300).contains(&code) {
        return Err(DownloadError::http(code, format!("probe returned HTTP {code}")));
    }

    let mut info = parse_server_info(&lines);
    if code == 206 {
        info.accept_ranges = true;
        if let Some(total) = lines.iter().find_map(|l| content_range_total(l)) {
            info.content_length = Some(total);
        }
    } else {
        // 200 for a ranged request: the server ignored the range.
        info.accept_ranges = false;
    }
    Ok(info)
}

fn fetch_blocking(
    url: &str,
    range: Option<ByteRange>,
    headers: &HashMap<String, String>,
    sink: mpsc::Sender<Bytes>,
) -> Result<(), DownloadError> {
    let mut easy = new_easy(url, headers)?;
    if let Some(r) = range {
        let value = match r.end {
            Some(end) => format!("{}-{}", r.start, end),
            None => format!("{}-", r.start),
        };
        easy.range(&value).map_err(curl_to_error)?;
    }
    // Idle-stream guard: abort when below 1 B/s for 30s. The fetcher applies
    // its own per-chunk timeout on top of this.
    easy.low_speed_limit(1).map_err(curl_to_error)?;
    easy.low_speed_time(Duration::from_secs(30))
        .map_err(curl_to_error)?;

    let status = Cell::new(0u16);
    let canceled = Cell::new(false);
    let range_ignored = Cell::new(false);
    let retry_after = Cell::new(None::<u64>);
    let mut error_body: Vec<u8> = Vec::new();

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    if let Some(code) = status_line_code(s) {
                        status.set(code);
                        retry_after.set(None);
                    }
                    if let Some(secs) = retry_after_secs(s) {
                        retry_after.set(Some(secs));
                    }
                }
                true
            })
            .map_err(curl_to_error)?;
        transfer
            .write_function(|data| {
                let code = status.get();
                if code >= 400 {
                    let room = ERROR_BODY_CAP.saturating_sub(error_body.len());
                    error_body.extend_from_slice(&data[..data.len().min(room)]);
                    return Ok(data.len());
                }
                // A 200 for a mid-file range means the server served the
                // whole body; writing it at the segment offset would corrupt
                // the file, so abort before forwarding anything.
                if code == 200 && range.map_or(false, |r| r.start > 0) {
                    range_ignored.set(true);
                    return Ok(0);
                }
                if sink.blocking_send(Bytes::copy_from_slice(data)).is_err() {
                    canceled.set(true);
                    return Ok(0);
                }
                Ok(data.len())
            })
            .map_err(curl_to_error)?;

        if let Err(e) = transfer.perform() {
            if canceled.get() {
                return Err(DownloadError::Canceled);
            }
            if range_ignored.get() {
                return Err(DownloadError::http(200, "server ignored range request"));
            }
            return Err(curl_to_error(e));
        }
    }

    if canceled.get() {
        return Err(DownloadError::Canceled);
    }
    let code = easy.response_code().map_err(curl_to_error)? as u16;
    if code >= 400 {
        let body = String::from_utf8_lossy(&error_body);
        let message = body.trim();
        let message = if message.is_empty() {
            format!("HTTP {code}")
        } else {
            message.to_string()
        };
        return Err(DownloadError::Http {
            status: code,
            message,
            retry_after: retry_after.get(),
        });
    }
    Ok(())
}

/// Shared easy-handle setup: URL, redirects, connect timeout, caller headers.
fn new_easy(
    url: &str,
    headers: &HashMap<String, String>,
) -> Result<curl::easy::Easy, DownloadError> {
    let mut easy = curl::easy::Easy::new();
    easy.url(url)
        .map_err(|e| DownloadError::Unsupported(format!("invalid url {url:?}: {e}")))?;
    easy.follow_location(true).map_err(curl_to_error)?;
    easy.connect_timeout(CONNECT_TIMEOUT).map_err(curl_to_error)?;

    if !headers.is_empty() {
        let mut list = curl::easy::List::new();
        for (k, v) in headers {
            list.append(&format!("{}: {}", k.trim(), v.trim()))
                .map_err(curl_to_error)?;
        }
        easy.http_headers(list).map_err(curl_to_error)?;
    }
    Ok(easy)
}

fn curl_to_error(e: curl::Error) -> DownloadError {
    DownloadError::Network(e.to_string())
}

/// `HTTP/1.1 206 Partial Content` → 206.
fn status_line_code(line: &str) -> Option<u16> {
    let line = line.trim();
    if !line.starts_with("HTTP/") {
        return None;
    }
    line.split_whitespace().nth(1)?.parse().ok()
}

/// `Content-Range: bytes 0-0/12345` → 12345.
fn content_range_total(line: &str) -> Option<u64> {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-range") {
        return None;
    }
    let total = value.trim().rsplit('/').next()?;
    total.parse().ok()
}

/// `Retry-After: 120` → 120. Date-format values are ignored.
fn retry_after_secs(line: &str) -> Option<u64> {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("retry-after") {
        return None;
    }
    value.trim().parse().ok()
}

fn parse_server_info(lines: &[String]) -> ServerInfo {
    let mut info = ServerInfo::default();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            if let Ok(n) = value.parse::<u64>() {
                info.content_length = Some(n);
            }
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            info.accept_ranges = value.eq_ignore_ascii_case("bytes");
        } else if name.eq_ignore_ascii_case("etag") {
            info.etag = Some(value.trim_matches('"').to_string());
        } else if name.eq_ignore_ascii_case("last-modified") {
            info.last_modified = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-disposition") {
            info.content_disposition = Some(value.to_string());
        }
    }
    info
}
