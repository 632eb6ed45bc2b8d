//! Worker pool: admission probing and worker lifecycle.
//!
//! The pool only ever grows, up to `max_workers`. Every admission after the
//! initial batch is gated by a probe: a 1-byte ranged GET that proves the
//! server will still serve range requests before we open another connection.

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::retry::RetryPolicy;

use super::segment::Segment;
use super::worker;
use super::{Transfer, PROBE_TIMEOUT};

struct PoolWorker {
    id: usize,
    handle: JoinHandle<()>,
}

/// Append-only set of workers for one download.
pub(super) struct WorkerPool {
    transfer: Arc<Transfer>,
    jobs: Receiver<Arc<Segment>>,
    policy: RetryPolicy,
    max_workers: usize,
    workers: Mutex<Vec<PoolWorker>>,
}

impl WorkerPool {
    pub(super) fn new(
        transfer: Arc<Transfer>,
        jobs: Receiver<Arc<Segment>>,
        policy: RetryPolicy,
        max_workers: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            transfer,
            jobs,
            policy,
            max_workers,
            workers: Mutex::new(Vec::new()),
        })
    }

    pub(super) fn worker_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// Spawns the initial workers without probing; the coordinator has just
    /// confirmed range support via HEAD.
    pub(super) fn spawn_initial(&self, count: usize) {
        let mut workers = self.workers.lock().unwrap();
        for _ in 0..count {
            let id = workers.len();
            let handle = worker::spawn(
                id,
                Arc::clone(&self.transfer),
                self.jobs.clone(),
                self.policy,
            );
            workers.push(PoolWorker { id, handle });
        }
    }

    /// Attempts to admit one more worker: probe first, then register and
    /// spawn. `Ok(false)` means the pool is at capacity or the server said no;
    /// `Err` is a transport failure of the probe itself (the caller skips the
    /// tick, no backoff beyond the tick interval).
    pub(super) fn try_admit(&self) -> Result<bool> {
        if self.worker_count() >= self.max_workers {
            return Ok(false);
        }
        if !probe_range(&self.transfer.url, &self.transfer.user_agent)? {
            return Ok(false);
        }

        let mut workers = self.workers.lock().unwrap();
        // Re-check under the lock: the probe ran without it.
        if workers.len() >= self.max_workers {
            return Ok(false);
        }
        let id = workers.len();
        let handle = worker::spawn(
            id,
            Arc::clone(&self.transfer),
            self.jobs.clone(),
            self.policy,
        );
        workers.push(PoolWorker { id, handle });
        tracing::debug!(worker_id = id, "admitted new worker");
        Ok(true)
    }

    /// Waits for every worker to exit. Call only after the job queue has
    /// closed (or cancellation tripped), otherwise workers never return.
    pub(super) fn join_all(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for w in workers {
            if w.handle.join().is_err() {
                tracing::warn!(worker_id = w.id, "worker thread panicked");
            }
        }
    }
}

/// Probes whether the server still honors range requests: GET the first byte
/// with a hard deadline, drain and discard the body, accept 206 or 200.
fn probe_range(url: &str, user_agent: &str) -> Result<bool> {
    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.useragent(user_agent)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.timeout(PROBE_TIMEOUT)?;
    easy.range("0-0")?;

    let mut headers = curl::easy::List::new();
    headers.append("Connection: close")?;
    easy.http_headers(headers)?;

    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| Ok(data.len()))?;
        transfer.perform().context("range probe failed")?;
    }

    let code = easy.response_code().context("no response code")?;
    Ok(code == 206 || code == 200)
}
