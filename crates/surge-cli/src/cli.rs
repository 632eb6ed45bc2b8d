//! Command-line front-end: argument parsing and the progress display.

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::Receiver;
use std::io::Write;
use std::path::PathBuf;

use surge_core::config::SurgeConfig;
use surge_core::control::DownloadAborted;
use surge_core::downloader::Downloader;
use surge_core::events::{self, DownloadEvent};
use surge_core::human::{format_bytes, format_duration};

/// surge: parallel HTTP download accelerator.
#[derive(Debug, Parser)]
#[command(name = "surge")]
#[command(about = "Download a file over many concurrent HTTP range requests", long_about = None)]
pub struct Cli {
    /// Direct HTTP/HTTPS URL to download.
    pub url: String,

    /// Output file, or an existing directory to download into.
    /// Defaults to the current directory.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Expected MD5 of the finished file (hex).
    #[arg(long)]
    pub md5: Option<String>,

    /// Expected SHA-256 of the finished file (hex).
    #[arg(long)]
    pub sha256: Option<String>,
}

pub fn run_from_args() -> Result<()> {
    let cli = Cli::parse();
    let cfg = SurgeConfig::load()?;
    tracing::debug!("loaded config: {:?}", cfg);

    let (sink, events) = events::event_channel();
    let downloader = Downloader::new(cfg, sink);
    let ui = std::thread::spawn(move || render_events(events));

    let out_path = cli.output.unwrap_or_else(|| PathBuf::from("."));
    let result = downloader.download(
        &cli.url,
        &out_path,
        cli.md5.as_deref(),
        cli.sha256.as_deref(),
    );
    drop(downloader); // closes the event channel so the UI thread exits
    let _ = ui.join();

    match result {
        Ok(dest) => {
            eprintln!("\nSaved {}", dest.display());
            Ok(())
        }
        Err(e) if e.is::<DownloadAborted>() => {
            eprintln!("\nAborted");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Renders progress as a single overwritten stderr line, then the terminal
/// event. A trailing progress event after completion is expected and ignored.
fn render_events(events: Receiver<DownloadEvent>) {
    let mut finished = false;
    for event in events {
        match event {
            DownloadEvent::Progress(p) if !finished => {
                let eta = p
                    .eta
                    .map(format_duration)
                    .unwrap_or_else(|| "--".to_string());
                eprint!(
                    "\r[surge] {:>6.2}% {}/{} ({:.1} KiB/s) ETA: {} conns: {} ",
                    p.percent(),
                    format_bytes(p.downloaded_bytes),
                    format_bytes(p.total_bytes),
                    p.avg_speed_kibps,
                    eta,
                    p.active_connections,
                );
                let _ = std::io::stderr().flush();
            }
            DownloadEvent::Progress(_) => {}
            DownloadEvent::Completed { elapsed, .. } => {
                finished = true;
                eprint!("\nDone in {}", format_duration(elapsed));
            }
            DownloadEvent::Error { message, .. } => {
                finished = true;
                eprint!("\nFailed: {}", message);
            }
        }
    }
}
