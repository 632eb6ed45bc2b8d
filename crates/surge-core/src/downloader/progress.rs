//! Progress aggregation: periodic totals, rolling speed window, ETA.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::events::{EventSink, Progress};

use super::pool::WorkerPool;
use super::Transfer;

/// Rolling window of per-tick speed samples (KiB/s) used to smooth the ETA.
pub(super) struct SpeedWindow {
    samples: VecDeque<f64>,
    cap: usize,
}

impl SpeedWindow {
    pub(super) fn new(cap: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub(super) fn push(&mut self, kibps: f64) {
        if self.samples.len() == self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(kibps);
    }

    pub(super) fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Ticks until the download completes or is cancelled, emitting one progress
/// event per tick. The totals are read under store lock then each segment
/// lock in turn; neither is held across the sleep.
pub(super) fn run(
    transfer: Arc<Transfer>,
    pool: Arc<WorkerPool>,
    events: EventSink,
    interval: Duration,
    window_cap: usize,
) {
    let started = Instant::now();
    let mut window = SpeedWindow::new(window_cap);

    loop {
        let downloaded = transfer.store.total_downloaded();
        let elapsed = started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            window.push(downloaded as f64 / 1024.0 / elapsed);
        }
        let avg_speed_kibps = window.average();

        let remaining = transfer.total_size.saturating_sub(downloaded);
        let eta = if remaining > 0 && avg_speed_kibps > 0.0 {
            Some(Duration::from_secs_f64(
                remaining as f64 / (avg_speed_kibps * 1024.0),
            ))
        } else if remaining == 0 {
            Some(Duration::ZERO)
        } else {
            None
        };

        events.progress(Progress {
            download_id: transfer.download_id,
            downloaded_bytes: downloaded,
            total_bytes: transfer.total_size,
            avg_speed_kibps,
            eta,
            active_connections: pool.worker_count(),
        });

        if downloaded >= transfer.total_size || transfer.cancel.is_cancelled() {
            break;
        }
        std::thread::sleep(interval);
    }
}
