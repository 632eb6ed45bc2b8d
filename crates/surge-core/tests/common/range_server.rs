//! Minimal HTTP/1.1 server with HEAD and Range GET support for integration
//! tests.
//!
//! Serves a single static body. HEAD answers with `Content-Length` and
//! (optionally) `Accept-Ranges: bytes`; GET honors `Range: bytes=a-b` with
//! 206 Partial Content. Options cover servers that ignore ranges, inject
//! extra response headers (checksums, Content-Disposition), or throttle
//! writes to keep transfers in flight while the pool grows.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// If true, GET ignores Range and always returns 200 with the full body,
    /// and `Accept-Ranges` is never advertised.
    pub no_ranges: bool,
    /// Extra response header lines (no CRLF) added to every response,
    /// e.g. `Content-MD5: <hex>`.
    pub extra_headers: Vec<String>,
    /// Throttle body writes: `(chunk_size, delay_per_chunk)`.
    pub throttle: Option<(usize, Duration)>,
}

/// Starts the server on a background thread serving `body`. Returns a URL
/// ending in `/testfile.bin` so filename inference has something to use.
/// The server runs until the process exits.
pub fn start(body: Vec<u8>, opts: ServerOptions) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let opts = Arc::new(opts);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let opts = Arc::clone(&opts);
            thread::spawn(move || handle(stream, &body, &opts));
        }
    });
    format!("http://127.0.0.1:{}/testfile.bin", port)
}

fn handle(mut stream: std::net::TcpStream, body: &[u8], opts: &ServerOptions) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));

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

    let accept_ranges = if opts.no_ranges {
        String::new()
    } else {
        "Accept-Ranges: bytes\r\n".to_string()
    };
    let extra: String = opts
        .extra_headers
        .iter()
        .map(|h| format!("{}\r\n", h))
        .collect();

    if method.eq_ignore_ascii_case("HEAD") {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}{}Connection: close\r\n\r\n",
            total, accept_ranges, extra
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if method.eq_ignore_ascii_case("GET") {
        let (status, content_range, slice) = match range.filter(|_| !opts.no_ranges) {
            Some((start, end_incl)) => {
                let end_incl = end_incl.min(total.saturating_sub(1));
                if start > end_incl || start >= total {
                    let response = format!(
                        "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Length: 0\r\nContent-Range: bytes */{}\r\nConnection: close\r\n\r\n",
                        total
                    );
                    let _ = stream.write_all(response.as_bytes());
                    return;
                }
                let slice = &body[start as usize..=end_incl as usize];
                (
                    "206 Partial Content",
                    format!("Content-Range: bytes {}-{}/{}\r\n", start, end_incl, total),
                    slice,
                )
            }
            None => ("200 OK", String::new(), body),
        };

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}{}{}Connection: close\r\n\r\n",
            status,
            slice.len(),
            content_range,
            accept_ranges,
            extra
        );
        if stream.write_all(response.as_bytes()).is_err() {
            return;
        }
        match opts.throttle {
            Some((chunk, delay)) => {
                for piece in slice.chunks(chunk.max(1)) {
                    if stream.write_all(piece).is_err() {
                        return;
                    }
                    thread::sleep(delay);
                }
            }
            None => {
                let _ = stream.write_all(slice);
            }
        }
        return;
    }

    let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
}

/// Returns (method, optional (start, end_inclusive) from `Range: bytes=X-Y`).
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
                let value = value.trim();
                if let Some(spec) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = spec.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end_incl = if b.trim().is_empty() {
                            u64::MAX
                        } else {
                            b.trim().parse::<u64>().unwrap_or(0)
                        };
                        range = Some((start, end_incl));
                    }
                }
            }
        }
    }
    (method, range)
}
