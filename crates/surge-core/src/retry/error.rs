//! Segment download error type for retry classification.

use std::fmt;

/// Error returned by a single segment transfer attempt.
/// Typed so we can classify and decide retries before converting to anyhow.
#[derive(Debug)]
pub enum SegmentError {
    /// Curl reported an error (timeout, connection, etc.).
    Curl(curl::Error),
    /// HTTP response had a status other than 200/206.
    Http(u32),
    /// The body ended before the requested range was satisfied. The byte
    /// count survives in the segment, so a retry resumes where this attempt
    /// stopped instead of starting over.
    ShortBody { expected: u64, received: u64 },
    /// Disk write failed (e.g. disk full, permission denied). Not retried.
    Storage(std::io::Error),
    /// The download's cancel token was tripped mid-transfer.
    Cancelled,
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentError::Curl(e) => write!(f, "{}", e),
            SegmentError::Http(code) => write!(f, "HTTP {}", code),
            SegmentError::ShortBody { expected, received } => {
                write!(f, "short body: expected {} bytes, got {}", expected, received)
            }
            SegmentError::Storage(e) => write!(f, "storage: {}", e),
            SegmentError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SegmentError::Curl(e) => Some(e),
            SegmentError::Storage(e) => Some(e),
            SegmentError::Http(_) | SegmentError::ShortBody { .. } | SegmentError::Cancelled => {
                None
            }
        }
    }
}
