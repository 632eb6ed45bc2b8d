//! Dynamic pool growth: admit a worker, then hand it the tail half of the
//! largest outstanding segment.
//!
//! Runs on a fixed tick. Each tick is independent: a failed probe or an
//! unprofitable split just skips to the next tick. The loop never holds the
//! store lock across network I/O — the probe runs first, the split after.

use crossbeam_channel::{SendTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use super::pool::WorkerPool;
use super::segment::Segment;
use super::Transfer;

const ENQUEUE_RETRY: Duration = Duration::from_millis(100);

pub(super) fn run(
    transfer: Arc<Transfer>,
    pool: Arc<WorkerPool>,
    jobs: Sender<Arc<Segment>>,
    min_remaining: u64,
    interval: Duration,
) {
    loop {
        std::thread::sleep(interval);
        if transfer.cancel.is_cancelled() {
            break;
        }
        if transfer.store.total_downloaded() >= transfer.total_size {
            break;
        }

        match pool.try_admit() {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "admission probe failed, skipping tick");
                continue;
            }
        }

        let split = match transfer
            .store
            .split_largest(min_remaining, |id| transfer.part_path(id))
        {
            Ok(Some(split)) => split,
            // Nothing worth splitting; the new worker waits on the queue.
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "could not create part file for split");
                continue;
            }
        };

        tracing::debug!(
            source_id = split.source_id,
            segment_id = split.segment.id(),
            start = split.segment.start(),
            end = split.segment.end(),
            "split largest segment"
        );

        if !enqueue(&jobs, split.segment, &transfer) {
            break;
        }
    }
    tracing::debug!("splitter exiting");
}

/// Sends the new segment, waiting when the queue is full but waking to honor
/// cancellation. Returns false when the queue closed or the download was
/// cancelled mid-wait.
fn enqueue(jobs: &Sender<Arc<Segment>>, segment: Arc<Segment>, transfer: &Transfer) -> bool {
    let mut pending = segment;
    loop {
        match jobs.send_timeout(pending, ENQUEUE_RETRY) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                if transfer.cancel.is_cancelled() {
                    return false;
                }
                pending = returned;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}
