//! Minimal loopback HTTP/1.1 server for integration tests.
//!
//! Serves one static body on every path. HEAD answers with the metadata
//! headers, GET honors `Range: bytes=a-b` (and the open-ended `bytes=a-`)
//! with 206 Partial Content. One request per connection; every response
//! carries `Connection: close`.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct RangeServerOptions {
    /// Omit `Content-Length` everywhere, forcing the unknown-size path.
    pub hide_length: bool,
    /// Answer every GET with 200 and the full body, `Range` or not.
    pub ignore_ranges: bool,
    pub content_disposition: Option<String>,
    pub content_type: Option<String>,
    /// GET requests whose `Range` starts at one of these offsets fail
    /// with 500.
    pub fail_range_starts: Vec<u64>,
}

pub struct RangeServer {
    base: String,
    head_hits: Arc<AtomicUsize>,
    get_hits: Arc<AtomicUsize>,
}

impl RangeServer {
    /// URL of the default document.
    pub fn url(&self) -> String {
        self.url_for("/data.bin")
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn head_hits(&self) -> usize {
        self.head_hits.load(Ordering::SeqCst)
    }

    pub fn get_hits(&self) -> usize {
        self.get_hits.load(Ordering::SeqCst)
    }

    pub fn hits(&self) -> usize {
        self.head_hits() + self.get_hits()
    }
}

/// Starts a server on a background thread serving `body`. It runs until the
/// test process exits.
pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let body = Arc::new(body);
    let opts = Arc::new(opts);
    let head_hits = Arc::new(AtomicUsize::new(0));
    let get_hits = Arc::new(AtomicUsize::new(0));

    let server = RangeServer {
        base: format!("http://127.0.0.1:{port}"),
        head_hits: Arc::clone(&head_hits),
        get_hits: Arc::clone(&get_hits),
    };
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let opts = Arc::clone(&opts);
            let head_hits = Arc::clone(&head_hits);
            let get_hits = Arc::clone(&get_hits);
            thread::spawn(move || handle(stream, &body, &opts, &head_hits, &get_hits));
        }
    });
    server
}

fn handle(
    mut stream: TcpStream,
    body: &[u8],
    opts: &RangeServerOptions,
    head_hits: &AtomicUsize,
    get_hits: &AtomicUsize,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let (method, range) = parse_request(request);
    let total = body.len() as u64;

    if method.eq_ignore_ascii_case("HEAD") {
        head_hits.fetch_add(1, Ordering::SeqCst);
        let _ = stream.write_all(
            format!("HTTP/1.1 200 OK\r\n{}\r\n", metadata_headers(opts, total)).as_bytes(),
        );
        return;
    }
    if method.eq_ignore_ascii_case("GET") {
        get_hits.fetch_add(1, Ordering::SeqCst);
        let range = if opts.ignore_ranges { None } else { range };
        if let Some((start, _)) = range {
            if opts.fail_range_starts.contains(&start) {
                let _ = stream.write_all(
                    b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                );
                return;
            }
        }
        let (status, slice) = match range {
            Some((start, end_incl)) => {
                let end_incl = end_incl.min(total.saturating_sub(1));
                if start > end_incl {
                    let _ = stream.write_all(
                        b"HTTP/1.1 416 Range Not Satisfiable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    );
                    return;
                }
                (
                    "206 Partial Content",
                    &body[start as usize..=end_incl as usize],
                )
            }
            None => ("200 OK", body),
        };
        let length_header = if opts.hide_length {
            String::new()
        } else {
            format!("Content-Length: {}\r\n", slice.len())
        };
        let response = format!(
            "HTTP/1.1 {status}\r\n{length_header}Accept-Ranges: bytes\r\nConnection: close\r\n\r\n"
        );
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.write_all(slice);
        let _ = stream.flush();
        return;
    }
    let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
}

fn metadata_headers(opts: &RangeServerOptions, total: u64) -> String {
    let mut headers = String::new();
    if !opts.hide_length {
        headers.push_str(&format!("Content-Length: {total}\r\n"));
    }
    if let Some(disposition) = &opts.content_disposition {
        headers.push_str(&format!("Content-Disposition: {disposition}\r\n"));
    }
    if let Some(content_type) = &opts.content_type {
        headers.push_str(&format!("Content-Type: {content_type}\r\n"));
    }
    headers.push_str("Accept-Ranges: bytes\r\nConnection: close\r\n");
    headers
}

/// Returns the method and, for `Range: bytes=a-b` or `bytes=a-`, the start
/// and inclusive end (`u64::MAX` when open-ended).
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
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("range") {
            continue;
        }
        let Some(spec) = value.trim().strip_prefix("bytes=") else {
            continue;
        };
        if let Some((a, b)) = spec.split_once('-') {
            let start = a.trim().parse::<u64>().unwrap_or(0);
            let end = b.trim();
            let end_incl = if end.is_empty() {
                u64::MAX
            } else {
                end.parse::<u64>().unwrap_or(0)
            };
            range = Some((start, end_incl));
        }
    }
    (method, range)
}
