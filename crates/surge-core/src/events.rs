//! Download events delivered to the embedding UI.
//!
//! The engine never blocks on a slow consumer: progress events are sent with
//! `try_send` and silently dropped when the channel is full, while terminal
//! events (completion, error) get a short bounded wait.

use crossbeam_channel::{Receiver, Sender};
use std::time::Duration;

/// Channel capacity; at the default reporting interval this is over a minute
/// of buffered progress before anything is dropped.
const EVENT_CHANNEL_CAPACITY: usize = 256;

const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Progress snapshot for one download.
#[derive(Debug, Clone)]
pub struct Progress {
    pub download_id: u64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    /// Smoothed average over the rolling speed window, in KiB/s.
    pub avg_speed_kibps: f64,
    /// Estimated time remaining; `None` when the average speed is zero.
    pub eta: Option<Duration>,
    /// Number of workers currently admitted to the pool.
    pub active_connections: usize,
}

impl Progress {
    /// Completion percentage, clamped to 100.
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let pct = self.downloaded_bytes as f64 / self.total_bytes as f64 * 100.0;
        pct.min(100.0)
    }

    /// Bytes still to download, clamped to zero.
    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.downloaded_bytes)
    }
}

/// Event emitted by the engine while a download runs.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Progress(Progress),
    Completed {
        download_id: u64,
        elapsed: Duration,
    },
    Error {
        download_id: u64,
        message: String,
    },
}

/// Sending half handed to the engine. Cloneable; all clones feed one receiver.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<DownloadEvent>,
}

impl EventSink {
    /// Emit a progress event. Dropped when the consumer lags.
    pub fn progress(&self, progress: Progress) {
        let _ = self.tx.try_send(DownloadEvent::Progress(progress));
    }

    /// Emit a terminal event, waiting briefly for a lagging consumer.
    pub fn terminal(&self, event: DownloadEvent) {
        let _ = self.tx.send_timeout(event, TERMINAL_SEND_TIMEOUT);
    }
}

/// Creates the event channel pair: the sink goes to the engine, the receiver
/// to the UI. Consumers must tolerate a final progress event arriving after
/// the completion event.
pub fn event_channel() -> (EventSink, Receiver<DownloadEvent>) {
    let (tx, rx) = crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY);
    (EventSink { tx }, rx)
}
