//! Cancellation for in-flight downloads.
//!
//! A single [`CancelToken`] is shared by the coordinator, every worker, the
//! splitter, and the progress loop. Transfers poll the token and stop; partial
//! part files are left in place for the caller to inspect or clean up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Error returned when a download is stopped by the caller.
#[derive(Debug)]
pub struct DownloadAborted;

impl std::fmt::Display for DownloadAborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "download aborted by caller")
    }
}

impl std::error::Error for DownloadAborted {}

/// Shared cancellation flag. Cloning is cheap; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; all holders observe the flag on their
    /// next poll (worker loops, curl progress callbacks, ticker loops).
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
