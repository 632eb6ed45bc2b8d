//! Single-stream GET fallback for servers without byte-range support.
//!
//! Writes the body sequentially to the destination file. No temp directory
//! and no part files; progress still flows through the normal event sink.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::control::{CancelToken, DownloadAborted};
use crate::events::{EventSink, Progress};

use super::progress::SpeedWindow;
use super::READ_CHUNK_SIZE;

/// Downloads `url` with one plain GET into `dest`. Returns the byte count.
#[allow(clippy::too_many_arguments)]
pub(super) fn download_single(
    download_id: u64,
    url: &str,
    user_agent: &str,
    dest: &Path,
    expected_len: Option<u64>,
    cancel: &CancelToken,
    events: &EventSink,
    interval: Duration,
    window_cap: usize,
) -> Result<u64> {
    let mut file =
        File::create(dest).with_context(|| format!("create destination {}", dest.display()))?;

    let written = Arc::new(AtomicU64::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let reporter = spawn_reporter(
        download_id,
        expected_len.unwrap_or(0),
        Arc::clone(&written),
        Arc::clone(&done),
        cancel.clone(),
        events.clone(),
        interval,
        window_cap,
    );

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.useragent(user_agent)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.fail_on_error(true)?;
    easy.connect_timeout(Duration::from_secs(30))?;
    easy.low_speed_limit(1024)?;
    easy.low_speed_time(Duration::from_secs(60))?;
    easy.buffer_size(READ_CHUNK_SIZE)?;
    easy.progress(true)?;

    let mut storage_error: Option<std::io::Error> = None;
    let perform_result = {
        let written = Arc::clone(&written);
        let mut transfer = easy.transfer();
        transfer.progress_function(|_, _, _, _| !cancel.is_cancelled())?;
        transfer.write_function(|data| match file.write_all(data) {
            Ok(()) => {
                written.fetch_add(data.len() as u64, Ordering::Relaxed);
                Ok(data.len())
            }
            Err(e) => {
                storage_error = Some(e);
                Ok(0)
            }
        })?;
        transfer.perform()
    };

    done.store(true, Ordering::Relaxed);
    let _ = reporter.join();

    if let Err(e) = perform_result {
        if cancel.is_cancelled() || e.is_aborted_by_callback() {
            return Err(anyhow::Error::new(DownloadAborted));
        }
        if let Some(io_err) = storage_error.take() {
            return Err(anyhow::Error::new(io_err).context("write destination"));
        }
        return Err(anyhow::Error::new(e).context("GET request failed"));
    }

    let code = easy.response_code().context("no response code")?;
    if !(200..300).contains(&code) {
        anyhow::bail!("GET {} returned HTTP {}", url, code);
    }

    file.sync_all()
        .with_context(|| format!("sync {}", dest.display()))?;

    let total = written.load(Ordering::Relaxed);
    if let Some(expected) = expected_len {
        if total != expected {
            anyhow::bail!("stream ended after {} of {} bytes", total, expected);
        }
    }
    Ok(total)
}

#[allow(clippy::too_many_arguments)]
fn spawn_reporter(
    download_id: u64,
    total_bytes: u64,
    written: Arc<AtomicU64>,
    done: Arc<AtomicBool>,
    cancel: CancelToken,
    events: EventSink,
    interval: Duration,
    window_cap: usize,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let started = Instant::now();
        let mut window = SpeedWindow::new(window_cap);
        loop {
            let downloaded = written.load(Ordering::Relaxed);
            let elapsed = started.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                window.push(downloaded as f64 / 1024.0 / elapsed);
            }
            let avg_speed_kibps = window.average();
            let remaining = total_bytes.saturating_sub(downloaded);
            let eta = if remaining > 0 && avg_speed_kibps > 0.0 {
                Some(Duration::from_secs_f64(
                    remaining as f64 / (avg_speed_kibps * 1024.0),
                ))
            } else {
                None
            };
            events.progress(Progress {
                download_id,
                downloaded_bytes: downloaded,
                total_bytes,
                avg_speed_kibps,
                eta,
                active_connections: 1,
            });
            if done.load(Ordering::Relaxed) || cancel.is_cancelled() {
                break;
            }
            std::thread::sleep(interval);
        }
    })
}
