//! Filename inference for downloads.
//!
//! Derives a safe local filename from the `Content-Disposition` response
//! header or the URL path, sanitized for Linux filesystems.

/// Fallback when neither the URL path nor Content-Disposition yields a name.
const DEFAULT_FILENAME: &str = "download.bin";

/// Maximum filename length in bytes (Linux NAME_MAX).
const NAME_MAX: usize = 255;

/// Derives a safe filename for saving a download.
///
/// Prefers the filename from `content_disposition` (if present and
/// parseable), otherwise the last path segment of `url`; the result is
/// sanitized (no `/`, NUL, or control chars, no leading/trailing dots).
pub fn derive_filename(url: &str, content_disposition: Option<&str>) -> String {
    let candidate = content_disposition
        .and_then(content_disposition_filename)
        .filter(|s| !s.is_empty())
        .or_else(|| filename_from_url_path(url));

    let raw = match candidate {
        Some(c) => c,
        None => return DEFAULT_FILENAME.to_string(),
    };

    let sanitized = sanitize_filename(&raw);
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        DEFAULT_FILENAME.to_string()
    } else {
        sanitized
    }
}

/// Extracts the last path segment of a URL for use as a filename hint.
/// Returns `None` if the URL cannot be parsed or the path is empty/root.
pub fn filename_from_url_path(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let segment = parsed
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .last()?;
    if segment == "." || segment == ".." {
        return None;
    }
    Some(segment.to_string())
}

/// Extracts the filename from a raw `Content-Disposition` header value.
///
/// Supports `filename="quoted"`, bare `filename=token`, and the RFC 5987
/// `filename*=UTF-8''percent-encoded` form; `filename*` wins when both exist.
pub fn content_disposition_filename(header_value: &str) -> Option<String> {
    let mut plain: Option<String> = None;

    for param in header_value.split(';') {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("filename*") {
            let encoded = value
                .strip_prefix("UTF-8''")
                .or_else(|| value.strip_prefix("utf-8''"));
            if let Some(encoded) = encoded {
                let decoded = percent_decode(encoded);
                if !decoded.is_empty() {
                    return Some(decoded);
                }
            }
        } else if name.eq_ignore_ascii_case("filename") {
            let unquoted = if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                unescape_quoted(&value[1..value.len() - 1])
            } else {
                value.to_string()
            };
            if !unquoted.is_empty() {
                plain = Some(unquoted);
            }
        }
    }

    plain
}

/// Sanitizes a candidate filename for safe use on Linux: path separators and
/// control characters become `_`, runs of `_` collapse, surrounding dots and
/// whitespace are trimmed, and the result is capped at NAME_MAX bytes.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;
    for c in name.chars() {
        let mapped = match c {
            '\0' | '/' | '\\' => '_',
            ' ' | '\t' => '_',
            c if c.is_control() => '_',
            c => c,
        };
        if mapped == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(mapped);
            prev_underscore = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_' || c == ' ');
    let mut take = trimmed.len().min(NAME_MAX);
    while take > 0 && !trimmed.is_char_boundary(take) {
        take -= 1;
    }
    trimmed[..take].to_string()
}

fn unescape_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next @ ('"' | '\\')) => out.push(next),
                Some(next) => {
                    out.push(c);
                    out.push(next);
                }
                None => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let pair = bytes.get(i + 1..i + 3).and_then(|p| {
                let hi = hex_val(p[0])?;
                let lo = hex_val(p[1])?;
                Some(hi << 4 | lo)
            });
            if let Some(b) = pair {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_from_url() {
        assert_eq!(
            derive_filename("https://example.com/a/b/image.iso", None),
            "image.iso"
        );
        assert_eq!(
            derive_filename("https://example.com/file.zip?token=abc", None),
            "file.zip"
        );
    }

    #[test]
    fn filename_from_content_disposition() {
        assert_eq!(
            derive_filename(
                "https://example.com/",
                Some("attachment; filename=\"report.pdf\"")
            ),
            "report.pdf"
        );
        assert_eq!(
            derive_filename("https://example.com/x", Some("attachment; filename=plain.bin")),
            "plain.bin"
        );
    }

    #[test]
    fn content_disposition_overrides_url() {
        assert_eq!(
            derive_filename(
                "https://example.com/archive.zip",
                Some("attachment; filename=\"real-name.tar.gz\"")
            ),
            "real-name.tar.gz"
        );
    }

    #[test]
    fn rfc5987_filename_star_wins() {
        assert_eq!(
            content_disposition_filename(
                "attachment; filename=\"fallback.bin\"; filename*=UTF-8''real%20name.dat"
            )
            .as_deref(),
            Some("real name.dat")
        );
        assert_eq!(
            content_disposition_filename("attachment; filename*=UTF-8''caf%C3%A9.txt").as_deref(),
            Some("café.txt")
        );
    }

    #[test]
    fn default_when_nothing_usable() {
        assert_eq!(derive_filename("https://example.com/", None), "download.bin");
        assert_eq!(derive_filename("https://example.com/..", None), "download.bin");
    }

    #[test]
    fn sanitization() {
        assert_eq!(sanitize_filename("a/b\\c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_filename("  ..file.txt.. "), "file.txt");
        assert_eq!(sanitize_filename("has\x07control.bin"), "has_control.bin");
        assert_eq!(sanitize_filename("many___underscores"), "many_underscores");
    }

    #[test]
    fn sanitize_caps_length_on_char_boundary() {
        let long = "é".repeat(200); // 400 bytes
        let out = sanitize_filename(&long);
        assert!(out.len() <= 255);
        assert!(out.is_char_boundary(out.len()));
    }
}
