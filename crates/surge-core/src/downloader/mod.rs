//! Segmented download engine.
//!
//! Splits the origin file into byte-range segments downloaded by a pool of
//! workers over concurrent HTTP Range GETs. The pool grows while the download
//! runs: a ticker probes the server and, on each successful admission, the
//! new worker takes over the tail half of whichever segment has the most
//! bytes left. Completed part files are merged in byte order and verified.
//!
//! Servers without range support get a sequential single-stream fallback.

mod merge;
mod pool;
mod progress;
mod segment;
mod single;
mod splitter;
mod worker;

pub use segment::{Segment, SegmentStore};

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::checksum;
use crate::config::SurgeConfig;
use crate::control::{CancelToken, DownloadAborted};
use crate::events::{DownloadEvent, EventSink};
use crate::fetch_head;
use crate::url_model;

/// Initial partition count.
pub const INITIAL_SEGMENTS: usize = 8;
/// Hard cap on workers; also the job queue capacity.
pub const MAX_WORKERS: usize = 128;
/// Smallest remaining byte count worth splitting.
pub const MIN_SEGMENT_SIZE: u64 = 2 * 1024 * 1024;
/// Pool-growth tick.
pub const SPLIT_INTERVAL: Duration = Duration::from_millis(200);
/// Progress reporting tick.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);
/// Admission probe deadline.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
/// Per-read body buffer size.
pub const READ_CHUNK_SIZE: usize = 32 * 1024;
/// Rolling speed window length, in samples.
pub const SPEED_WINDOW_SAMPLES: usize = 30;

/// How often the coordinator re-checks the completion condition.
const COMPLETION_POLL: Duration = Duration::from_millis(50);

static NEXT_DOWNLOAD_ID: AtomicU64 = AtomicU64::new(0);

/// Shared state for one in-flight download, owned by the coordinator and
/// referenced by workers, the splitter, and the progress loop.
pub(crate) struct Transfer {
    pub(crate) download_id: u64,
    pub(crate) url: String,
    pub(crate) user_agent: String,
    pub(crate) total_size: u64,
    pub(crate) store: SegmentStore,
    pub(crate) cancel: CancelToken,
    fatal: Mutex<Option<anyhow::Error>>,
    tmp_dir: PathBuf,
    filename: String,
}

impl Transfer {
    /// Path of the part file backing segment `id`.
    pub(crate) fn part_path(&self, id: usize) -> PathBuf {
        self.tmp_dir.join(format!("{}.part{}", self.filename, id))
    }

    /// Records the first terminal error and trips cancellation so every loop
    /// winds down. Later errors are logged and dropped.
    pub(crate) fn record_fatal(&self, err: anyhow::Error) {
        let mut slot = self.fatal.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        } else {
            tracing::debug!(error = %err, "suppressing secondary error");
        }
        drop(slot);
        self.cancel.cancel();
    }
}

/// One download run: seeds segments, grows the worker pool, reports progress,
/// merges and verifies the result.
pub struct Downloader {
    id: u64,
    config: SurgeConfig,
    events: EventSink,
    cancel: CancelToken,
}

impl Downloader {
    pub fn new(config: SurgeConfig, events: EventSink) -> Self {
        Self {
            id: NEXT_DOWNLOAD_ID.fetch_add(1, Ordering::Relaxed),
            config,
            events,
            cancel: CancelToken::new(),
        }
    }

    /// Token that aborts this download when cancelled. Workers stop, the
    /// splitter stops, and partial part files are left in place.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Downloads `url` to `out_path` (a file path, or an existing directory
    /// to place the inferred filename in). Optional hex digests are verified
    /// against the finished file along with any server-advertised checksums.
    ///
    /// Returns the destination path on success. Cancellation surfaces as a
    /// [`DownloadAborted`] error without an error event.
    pub fn download(
        &self,
        url: &str,
        out_path: &Path,
        md5: Option<&str>,
        sha256: Option<&str>,
    ) -> Result<PathBuf> {
        let started = Instant::now();
        let result = self.run(url, out_path, md5, sha256);
        match &result {
            Ok(dest) => {
                let elapsed = started.elapsed();
                tracing::info!(
                    download_id = self.id,
                    dest = %dest.display(),
                    ?elapsed,
                    "download complete"
                );
                self.events.terminal(DownloadEvent::Completed {
                    download_id: self.id,
                    elapsed,
                });
            }
            Err(e) if e.is::<DownloadAborted>() => {
                tracing::info!(download_id = self.id, "download aborted");
            }
            Err(e) => {
                tracing::error!(download_id = self.id, error = %format!("{:#}", e), "download failed");
                self.events.terminal(DownloadEvent::Error {
                    download_id: self.id,
                    message: format!("{:#}", e),
                });
            }
        }
        result
    }

    fn run(
        &self,
        url: &str,
        out_path: &Path,
        md5: Option<&str>,
        sha256: Option<&str>,
    ) -> Result<PathBuf> {
        let head =
            fetch_head::probe(url, &self.config.user_agent).context("HEAD request failed")?;
        let filename = url_model::derive_filename(url, head.content_disposition.as_deref());
        let dest = merge::resolve_destination(out_path, &filename);
        let expected = checksum::Expected {
            md5: md5.map(str::to_string),
            sha256: sha256.map(str::to_string),
            server_md5: head.content_md5.clone(),
            server_sha256: head.checksum_sha256.clone(),
        };

        if !head.accept_ranges {
            tracing::info!(
                download_id = self.id,
                "server does not accept byte ranges, using single stream"
            );
            single::download_single(
                self.id,
                url,
                &self.config.user_agent,
                &dest,
                head.content_length,
                &self.cancel,
                &self.events,
                PROGRESS_INTERVAL,
                SPEED_WINDOW_SAMPLES,
            )?;
            checksum::verify_file(&dest, &expected)?;
            return Ok(dest);
        }

        let total_size = head
            .content_length
            .context("response lacks a parseable Content-Length")?;
        if total_size == 0 {
            // Nothing to segment; just materialize the empty file.
            fs::File::create(&dest)
                .with_context(|| format!("create destination {}", dest.display()))?;
            checksum::verify_file(&dest, &expected)?;
            return Ok(dest);
        }

        // Part files live next to the destination: `<dir>/<filename>-surge/`.
        let parent = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tmp_dir = parent.join(format!("{}-surge", filename));
        fs::create_dir(&tmp_dir).with_context(|| {
            format!(
                "create temp dir {} (a previous run may have left it behind)",
                tmp_dir.display()
            )
        })?;

        tracing::info!(
            download_id = self.id,
            url,
            total_size,
            filename = %filename,
            "starting segmented download"
        );

        let transfer = Arc::new(Transfer {
            download_id: self.id,
            url: url.to_string(),
            user_agent: self.config.user_agent.clone(),
            total_size,
            store: SegmentStore::new(),
            cancel: self.cancel.clone(),
            fatal: Mutex::new(None),
            tmp_dir,
            filename,
        });

        let part_path = {
            let transfer = Arc::clone(&transfer);
            move |id| transfer.part_path(id)
        };
        let segments = transfer
            .store
            .seed(total_size, INITIAL_SEGMENTS, part_path)
            .context("seed segments")?;

        let (jobs_tx, jobs_rx) = crossbeam_channel::bounded::<Arc<Segment>>(MAX_WORKERS);
        for s in &segments {
            jobs_tx
                .send(Arc::clone(s))
                .map_err(|_| anyhow::anyhow!("job queue closed before start"))?;
        }

        let policy = self.config.retry_policy();
        let pool = pool::WorkerPool::new(Arc::clone(&transfer), jobs_rx, policy, MAX_WORKERS);
        pool.spawn_initial(segments.len());

        let splitter_handle = {
            let transfer = Arc::clone(&transfer);
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || {
                splitter::run(transfer, pool, jobs_tx, MIN_SEGMENT_SIZE, SPLIT_INTERVAL)
            })
        };
        let progress_handle = {
            let transfer = Arc::clone(&transfer);
            let pool = Arc::clone(&pool);
            let events = self.events.clone();
            std::thread::spawn(move || {
                progress::run(transfer, pool, events, PROGRESS_INTERVAL, SPEED_WINDOW_SAMPLES)
            })
        };

        // All bytes accounted for, cancellation, or a worker's fatal error
        // (which trips cancellation) ends the wait.
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if transfer.store.total_downloaded() >= total_size {
                break;
            }
            std::thread::sleep(COMPLETION_POLL);
        }

        // The splitter exits on the same conditions and drops the last job
        // sender with it; idle workers then drain out on the closed queue.
        let _ = splitter_handle.join();
        pool.join_all();
        let _ = progress_handle.join();

        if let Some(err) = transfer.fatal.lock().unwrap().take() {
            return Err(err);
        }
        if self.cancel.is_cancelled() {
            return Err(anyhow::Error::new(DownloadAborted));
        }

        merge::finalize(&transfer, &dest)?;
        checksum::verify_file(&dest, &expected)?;
        Ok(dest)
    }
}
