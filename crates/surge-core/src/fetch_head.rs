//! HTTP HEAD metadata probing.
//!
//! Uses the curl crate (libcurl) to fetch response headers and learn the
//! file size, whether the server accepts byte ranges, the suggested filename,
//! and any server-advertised checksums.

use anyhow::{Context, Result};
use std::str;
use std::time::Duration;

/// Metadata from a HEAD request, as needed to plan a segmented download.
#[derive(Debug, Clone, Default)]
pub struct HeadInfo {
    /// Total size in bytes, if `Content-Length` is present and parseable.
    pub content_length: Option<u64>,
    /// True if the server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
    /// `Content-Disposition` value if present (filename hint).
    pub content_disposition: Option<String>,
    /// `Content-MD5` value if present (hex digest of the whole file).
    pub content_md5: Option<String>,
    /// `X-Checksum-SHA256` value if present.
    pub checksum_sha256: Option<String>,
}

/// Performs a HEAD request and returns parsed metadata. Follows redirects;
/// only the final response's headers are kept.
pub fn probe(url: &str, user_agent: &str) -> Result<HeadInfo> {
    let mut lines: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.nobody(true)?; // HEAD request
    easy.useragent(user_agent)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(Duration::from_secs(15))?;
    easy.timeout(Duration::from_secs(30))?;

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                let line = s.trim_end();
                // Redirect-safe: curl emits one header block per hop. Clear on
                // each status line so only the final response survives.
                if line.starts_with("HTTP/") {
                    lines.clear();
                }
                lines.push(line.to_string());
            }
            true
        })?;
        transfer.perform().context("HEAD request failed")?;
    }

    let code = easy.response_code().context("no response code")?;
    if !(200..300).contains(&code) {
        anyhow::bail!("HEAD {} returned HTTP {}", url, code);
    }

    Ok(parse_headers(&lines))
}

/// Parses raw header lines into [`HeadInfo`]. Header names are
/// case-insensitive; values are trimmed.
pub fn parse_headers(lines: &[String]) -> HeadInfo {
    let mut info = HeadInfo::default();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            info.content_length = value.parse::<u64>().ok();
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            info.accept_ranges = value.eq_ignore_ascii_case("bytes");
        } else if name.eq_ignore_ascii_case("content-disposition") {
            info.content_disposition = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-md5") {
            info.content_md5 = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("x-checksum-sha256") {
            info.checksum_sha256 = Some(value.to_string());
        }
    }
    info
}
