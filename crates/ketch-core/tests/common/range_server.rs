//! Minimal HTTP/1.1 server with HEAD + Range GET support for integration
//! tests.
//!
//! Serves a single configurable resource. Behavior (range support, blocked
//! HEAD, validators, fault injection, pacing) is mutable at runtime so tests
//! can flip it mid-download.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Mutable server behavior; lock it through [`ServerHandle::state`].
pub struct ServerState {
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_disposition: Option<String>,
    /// If false, GET ignores Range and answers 200 with the full body.
    pub support_ranges: bool,
    /// If false, HEAD answers 405 (simulates servers that block HEAD).
    pub head_allowed: bool,
    /// Close the connection once the absolute file offset reaches this.
    pub fail_at_offset: Option<u64>,
    /// Pacing delay per 8 KiB chunk of body.
    pub chunk_delay: Option<Duration>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            body: Vec::new(),
            etag: Some("test-etag-1".to_string()),
            last_modified: Some("Wed, 21 Oct 2015 07:28:00 GMT".to_string()),
            content_disposition: None,
            support_ranges: true,
            head_allowed: true,
            fail_at_offset: None,
            chunk_delay: None,
        }
    }
}

#[derive(Clone)]
pub struct ServerHandle {
    url: String,
    state: Arc<Mutex<ServerState>>,
}

impl ServerHandle {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_etag(&self, etag: &str) {
        self.with_state(|s| s.etag = Some(etag.to_string()));
    }

    pub fn set_body(&self, body: Vec<u8>) {
        self.with_state(|s| s.body = body);
    }

    pub fn set_fail_at_offset(&self, offset: Option<u64>) {
        self.with_state(|s| s.fail_at_offset = offset);
    }
}

/// Serve `body` with default behavior.
pub fn start(body: Vec<u8>) -> ServerHandle {
    start_with(ServerState {
        body,
        ..ServerState::default()
    })
}

/// Serve with full control over behavior.
pub fn start_with(state: ServerState) -> ServerHandle {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(Mutex::new(state));
    let accept_state = Arc::clone(&state);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let state = Arc::clone(&accept_state);
            thread::spawn(move || handle(stream, &state));
        }
    });
    ServerHandle {
        url: format!("http://127.0.0.1:{port}/file.bin"),
        state,
    }
}

struct Snapshot {
    body: Vec<u8>,
    etag: Option<String>,
    last_modified: Option<String>,
    content_disposition: Option<String>,
    support_ranges: bool,
    head_allowed: bool,
    fail_at_offset: Option<u64>,
    chunk_delay: Option<Duration>,
}

fn snapshot(state: &Mutex<ServerState>) -> Snapshot {
    let s = state.lock().unwrap();
    Snapshot {
        body: s.body.clone(),
        etag: s.etag.clone(),
        last_modified: s.last_modified.clone(),
        content_disposition: s.content_disposition.clone(),
        support_ranges: s.support_ranges,
        head_allowed: s.head_allowed,
        fail_at_offset: s.fail_at_offset,
        chunk_delay: s.chunk_delay,
    }
}

fn handle(mut stream: TcpStream, state: &Mutex<ServerState>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, range) = parse_request(request);
    let snap = snapshot(state);
    let total = snap.body.len() as u64;

    let mut common = String::new();
    if snap.support_ranges {
        common.push_str("Accept-Ranges: bytes\r\n");
    }
    if let Some(etag) = &snap.etag {
        common.push_str(&format!("ETag: \"{etag}\"\r\n"));
    }
    if let Some(lm) = &snap.last_modified {
        common.push_str(&format!("Last-Modified: {lm}\r\n"));
    }
    if let Some(cd) = &snap.content_disposition {
        common.push_str(&format!("Content-Disposition: {cd}\r\n"));
    }
    common.push_str("Connection: close\r\n");

    if method.eq_ignore_ascii_case("HEAD") {
        if !snap.head_allowed {
            let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
            return;
        }
        let response = format!("HTTP/1.1 200 OK\r\nContent-Length: {total}\r\n{common}\r\n");
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
        return;
    }

    let (status, start, end_incl) = match range {
        Some((rs, re)) if snap.support_ranges => {
            let start = rs.min(total);
            let end = re.min(total.saturating_sub(1));
            if start > end {
                let response = format!(
                    "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Length: 0\r\nContent-Range: bytes */{total}\r\n{common}\r\n"
                );
                let _ = stream.write_all(response.as_bytes());
                return;
            }
            ("206 Partial Content", start, end)
        }
        _ => ("200 OK", 0, total.saturating_sub(1)),
    };

    let slice = if total == 0 {
        &snap.body[0..0]
    } else {
        &snap.body[start as usize..=end_incl as usize]
    };
    let content_range = if total == 0 {
        format!("bytes */{total}")
    } else {
        format!("bytes {start}-{end_incl}/{total}")
    };
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Range: {content_range}\r\n{common}\r\n",
        slice.len()
    );
    if stream.write_all(response.as_bytes()).is_err() {
        return;
    }

    // Body in 8 KiB chunks so pacing and mid-stream faults have resolution.
    let mut offset = start;
    let mut sent = 0usize;
    while sent < slice.len() {
        if let Some(fail_at) = snap.fail_at_offset {
            if offset >= fail_at {
                let _ = stream.shutdown(std::net::Shutdown::Both);
                return;
            }
        }
        let take = (slice.len() - sent).min(8192);
        if let Some(delay) = snap.chunk_delay {
            thread::sleep(delay);
        }
        if stream.write_all(&slice[sent..sent + take]).is_err() {
            return;
        }
        sent += take;
        offset += take as u64;
    }
}

/// Returns (method, optional (start, end_inclusive)) for `Range: bytes=X-Y`.
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim().to_ascii_lowercase();
                if let Some(spec) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = spec.trim().split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end = if b.trim().is_empty() {
                            u64::MAX
                        } else {
                            b.trim().parse::<u64>().unwrap_or(0)
                        };
                        range = Some((start, end));
                    }
                }
            }
        }
    }
    (method, range)
}
