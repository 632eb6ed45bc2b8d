//! Worker loop: one HTTP Range GET per segment, streamed to the part file.

use crossbeam_channel::Receiver;
use std::cell::Cell;
use std::fs::OpenOptions;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::retry::{run_with_retry, RetryPolicy, SegmentError};

use super::segment::Segment;
use super::{Transfer, READ_CHUNK_SIZE};

/// Spawns a worker thread that pulls segments from the job queue until the
/// queue closes, the download is cancelled, or a segment fails terminally.
pub(super) fn spawn(
    worker_id: usize,
    transfer: Arc<Transfer>,
    jobs: Receiver<Arc<Segment>>,
    policy: RetryPolicy,
) -> JoinHandle<()> {
    std::thread::spawn(move || worker_loop(worker_id, transfer, jobs, policy))
}

fn worker_loop(
    worker_id: usize,
    transfer: Arc<Transfer>,
    jobs: Receiver<Arc<Segment>>,
    policy: RetryPolicy,
) {
    while let Ok(segment) = jobs.recv() {
        if transfer.cancel.is_cancelled() {
            break;
        }
        let result = run_with_retry(&policy, &transfer.cancel, || {
            fetch_segment(&transfer, &segment)
        });
        match result {
            Ok(()) => {
                tracing::debug!(worker_id, segment_id = segment.id(), "segment complete");
            }
            Err(SegmentError::Cancelled) => break,
            Err(e) => {
                let err = anyhow::Error::new(e)
                    .context(format!("segment {} failed after retries", segment.id()));
                transfer.record_fatal(err);
                break;
            }
        }
    }
    tracing::debug!(worker_id, "worker exiting");
}

/// Downloads the segment's current remaining range `[start + downloaded, end]`
/// with a single ranged GET, appending to the part file.
///
/// Every body chunk goes through [`Segment::write_chunk`], which clips at the
/// segment's live `end`; if the splitter shrank the range mid-transfer the
/// clipped write aborts the transfer and the segment counts as complete.
fn fetch_segment(transfer: &Transfer, segment: &Segment) -> Result<(), SegmentError> {
    let (from, end) = segment.request_range();
    if from > end {
        // Already complete (e.g. clipped to nothing by a prior attempt).
        return Ok(());
    }

    let mut file = OpenOptions::new()
        .append(true)
        .open(segment.part_path())
        .map_err(SegmentError::Storage)?;
    // Drop any bytes a failed attempt wrote past the committed count, so the
    // file length always equals `downloaded` when the transfer starts.
    file.set_len(segment.downloaded())
        .map_err(SegmentError::Storage)?;

    let mut easy = curl::easy::Easy::new();
    easy.url(&transfer.url).map_err(SegmentError::Curl)?;
    easy.useragent(&transfer.user_agent)
        .map_err(SegmentError::Curl)?;
    easy.follow_location(true).map_err(SegmentError::Curl)?;
    easy.fail_on_error(true).map_err(SegmentError::Curl)?;
    easy.connect_timeout(Duration::from_secs(30))
        .map_err(SegmentError::Curl)?;
    // Abort if throughput drops below 1 KiB/s for 60s rather than holding a
    // dead connection open.
    easy.low_speed_limit(1024).map_err(SegmentError::Curl)?;
    easy.low_speed_time(Duration::from_secs(60))
        .map_err(SegmentError::Curl)?;
    easy.buffer_size(READ_CHUNK_SIZE)
        .map_err(SegmentError::Curl)?;
    easy.range(&format!("{}-{}", from, end))
        .map_err(SegmentError::Curl)?;
    easy.progress(true).map_err(SegmentError::Curl)?;

    let mut headers = curl::easy::List::new();
    headers
        .append("Connection: close")
        .map_err(SegmentError::Curl)?;
    easy.http_headers(headers).map_err(SegmentError::Curl)?;

    let clipped = Cell::new(false);
    let mut storage_error: Option<std::io::Error> = None;

    let perform_result = {
        let cancel = &transfer.cancel;
        let mut transfer_handle = easy.transfer();
        transfer_handle
            .progress_function(move |_, _, _, _| !cancel.is_cancelled())
            .map_err(SegmentError::Curl)?;
        transfer_handle
            .write_function(|data| match segment.write_chunk(&mut file, data) {
                Ok(n) if n == data.len() => Ok(n),
                Ok(n) => {
                    // Range shrank under us; the short return aborts the transfer.
                    clipped.set(true);
                    Ok(n)
                }
                Err(e) => {
                    storage_error = Some(e);
                    Ok(0)
                }
            })
            .map_err(SegmentError::Curl)?;
        transfer_handle.perform()
    };

    if let Err(e) = perform_result {
        if clipped.get() {
            // Deliberate early stop after a split; fall through to the
            // completeness check below.
        } else if transfer.cancel.is_cancelled() || e.is_aborted_by_callback() {
            return Err(SegmentError::Cancelled);
        } else if let Some(io_err) = storage_error.take() {
            return Err(SegmentError::Storage(io_err));
        } else if e.is_http_returned_error() {
            let code = easy.response_code().unwrap_or(0);
            return Err(SegmentError::Http(code));
        } else {
            return Err(SegmentError::Curl(e));
        }
    } else {
        let code = easy.response_code().map_err(SegmentError::Curl)?;
        if code != 200 && code != 206 {
            return Err(SegmentError::Http(code));
        }
    }

    if !segment.is_complete() {
        // Server closed the body early; `downloaded` survives, so the retry
        // resumes from where this attempt stopped.
        return Err(SegmentError::ShortBody {
            expected: segment.end() - segment.start() + 1,
            received: segment.downloaded(),
        });
    }

    Ok(())
}
