//! Checksum verification of the merged file.
//!
//! Digests are computed on demand after completion, not inline with the
//! download path, to avoid impacting throughput. A mismatch is fatal but the
//! destination file is left in place for inspection.

use anyhow::{bail, Context, Result};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const BUF_SIZE: usize = 64 * 1024;

fn digest_path<D: Digest>(path: &Path) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = D::new();
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compute SHA-256 of a file and return the digest as lowercase hex.
/// Reads in chunks to keep memory use bounded; suitable for large files.
pub fn sha256_path(path: &Path) -> Result<String> {
    digest_path::<Sha256>(path)
}

/// Compute MD5 of a file and return the digest as lowercase hex.
pub fn md5_path(path: &Path) -> Result<String> {
    digest_path::<Md5>(path)
}

/// Expected digests for a finished download, from the caller and/or the
/// server's `Content-MD5` / `X-Checksum-SHA256` response headers.
#[derive(Debug, Clone, Default)]
pub struct Expected {
    pub md5: Option<String>,
    pub sha256: Option<String>,
    pub server_md5: Option<String>,
    pub server_sha256: Option<String>,
}

impl Expected {
    pub fn is_empty(&self) -> bool {
        self.md5.is_none()
            && self.sha256.is_none()
            && self.server_md5.is_none()
            && self.server_sha256.is_none()
    }
}

/// Verifies `path` against every expectation present in `expected`.
///
/// Each algorithm is hashed at most once even when both a caller-supplied and
/// a server-supplied value exist. Comparison is case-insensitive hex.
pub fn verify_file(path: &Path, expected: &Expected) -> Result<()> {
    if expected.is_empty() {
        return Ok(());
    }

    let md5_expectations = [("md5", &expected.md5), ("Content-MD5", &expected.server_md5)];
    if md5_expectations.iter().any(|(_, v)| v.is_some()) {
        let actual = md5_path(path)?;
        for (source, value) in md5_expectations {
            if let Some(want) = value {
                check_digest(source, want, &actual)?;
            }
        }
        tracing::debug!(file = %path.display(), "md5 verified");
    }

    let sha_expectations = [
        ("sha256", &expected.sha256),
        ("X-Checksum-SHA256", &expected.server_sha256),
    ];
    if sha_expectations.iter().any(|(_, v)| v.is_some()) {
        let actual = sha256_path(path)?;
        for (source, value) in sha_expectations {
            if let Some(want) = value {
                check_digest(source, want, &actual)?;
            }
        }
        tracing::debug!(file = %path.display(), "sha256 verified");
    }

    Ok(())
}

fn check_digest(source: &str, want: &str, actual: &str) -> Result<()> {
    if !want.trim().eq_ignore_ascii_case(actual) {
        bail!(
            "checksum mismatch ({}): expected {}, file has {}",
            source,
            want.trim(),
            actual
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn sha256_path_empty_file() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let digest = sha256_path(f.path()).unwrap();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn md5_path_known_content() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        let digest = md5_path(f.path()).unwrap();
        assert_eq!(digest, "b1946ac92492d2347c6235b4d2611184");
    }

    #[test]
    fn verify_passes_on_matching_digests() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        let expected = Expected {
            md5: Some("B1946AC92492D2347C6235B4D2611184".to_string()),
            sha256: Some(
                "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03".to_string(),
            ),
            ..Default::default()
        };
        verify_file(f.path(), &expected).unwrap();
    }

    #[test]
    fn verify_fails_on_mismatch() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        let expected = Expected {
            sha256: Some("deadbeef".to_string()),
            ..Default::default()
        };
        let err = verify_file(f.path(), &expected).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
        assert!(f.path().exists(), "file must be left in place");
    }

    #[test]
    fn verify_checks_server_headers() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        let expected = Expected {
            server_md5: Some("00000000000000000000000000000000".to_string()),
            ..Default::default()
        };
        assert!(verify_file(f.path(), &expected).is_err());
    }

    #[test]
    fn verify_empty_expectations_is_ok() {
        let f = tempfile::NamedTempFile::new().unwrap();
        verify_file(f.path(), &Expected::default()).unwrap();
    }
}
