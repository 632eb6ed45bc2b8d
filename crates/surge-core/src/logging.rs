//! Logging setup.
//!
//! The CLI's progress line owns stderr, so diagnostics default to a file in
//! the XDG state dir and only land on stderr when that file cannot be opened.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "surge.log";
const DEFAULT_FILTER: &str = "info,surge=debug";

/// A log file that has grown past this is started fresh instead of appended.
const MAX_LOG_BYTES: u64 = 4 * 1024 * 1024;

/// Where [`init`] ended up sending log output.
#[derive(Debug)]
pub enum LogTarget {
    File(PathBuf),
    Stderr,
}

/// Installs the global tracing subscriber: `~/.local/state/surge/surge.log`
/// when possible, stderr otherwise. The filter comes from `RUST_LOG`, with a
/// `info,surge=debug` default.
pub fn init() -> LogTarget {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match open_log_file() {
        Ok((file, path)) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
            tracing::info!(log = %path.display(), "logging to file");
            LogTarget::File(path)
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .init();
            tracing::warn!(error = %format!("{:#}", e), "log file unavailable, logging to stderr");
            LogTarget::Stderr
        }
    }
}

/// Opens (or rotates) the state-dir log file.
fn open_log_file() -> Result<(fs::File, PathBuf)> {
    let path = xdg::BaseDirectories::with_prefix("surge")?
        .place_state_file(LOG_FILE)
        .context("state dir unavailable")?;

    let rotate = fs::metadata(&path)
        .map(|m| m.len() > MAX_LOG_BYTES)
        .unwrap_or(false);

    let mut opts = fs::OpenOptions::new();
    opts.create(true).write(true);
    if rotate {
        opts.truncate(true);
    } else {
        opts.append(true);
    }
    let file = opts
        .open(&path)
        .with_context(|| format!("open {}", path.display()))?;
    Ok((file, path))
}
