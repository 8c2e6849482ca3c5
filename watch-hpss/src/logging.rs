use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;
use libhpss::Instrument;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// `<log_root>/<YYYYMMDD>.<instrument>.hpss.log` for `date`.
pub fn log_path(log_root: &Path, date: &str, instrument: &Instrument) -> PathBuf {
    log_root.join(instrument.log_filename(date))
}

/// Install the global subscriber. Logs go to today's file under `log_root`
/// if given, otherwise to stderr. `RUST_LOG` overrides the `info` default.
///
/// Returns the log file in use, if any.
pub fn init(log_root: Option<&Path>, instrument: &Instrument) -> Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(log_root) = log_root else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(true),
            )
            .try_init()
            .context("failed to install log subscriber")?;
        return Ok(None);
    };

    let path = open_path(log_root, instrument)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()
        .context("failed to install log subscriber")?;
    Ok(Some(path))
}

fn open_path(log_root: &Path, instrument: &Instrument) -> Result<PathBuf> {
    fs::create_dir_all(log_root)
        .with_context(|| format!("failed to create log directory {}", log_root.display()))?;
    let date = Local::now().format("%Y%m%d").to_string();
    Ok(log_path(log_root, &date, instrument))
}
