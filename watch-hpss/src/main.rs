mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use libhpss::{Instrument, Scheduler, ShutdownToken, SignalHandler, WatchConfig, backend};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "watch_hpss",
    version,
    about = "Archive files staged for an instrument and remove them once verified"
)]
struct Args {
    /// Instrument whose staging directory is drained, e.g. kcor
    #[arg(value_name = "INSTRUMENT")]
    instrument: String,

    #[arg(
        short,
        long,
        env = "WATCH_HPSS_CONFIG",
        default_value = "/etc/watch_hpss/watch_hpss.yaml"
    )]
    config: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("watch_hpss: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = WatchConfig::load(&args.config)?;
    let instrument = Instrument::new(args.instrument)?;
    let log_file = logging::init(config.log_root.as_deref(), &instrument)?;

    let staging_dir = instrument.staging_dir(&config.queue_root);
    if !staging_dir.is_dir() {
        bail!("staging directory {} does not exist", staging_dir.display());
    }
    let archive_dir = instrument.archive_dir(&config.archive_root);

    let signals = config.signals()?;
    let handler = SignalHandler::install(&signals, ShutdownToken::new())
        .context("failed to install signal handlers")?;

    info!(
        "starting watch_hpss for {instrument} (config {}, log {})",
        args.config.display(),
        log_file
            .as_deref()
            .map_or_else(|| "stderr".into(), |p| p.display().to_string())
    );

    let scheduler = Scheduler::new(
        config.scheduler_config(),
        staging_dir,
        archive_dir,
        backend::from_config(&config.backend),
        handler.token().clone(),
    );
    scheduler.run();

    drop(handler);
    info!("watch_hpss for {instrument} exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from(["watch_hpss", "kcor", "--config", "/tmp/w.yaml"]).unwrap();
        assert_eq!(args.instrument, "kcor");
        assert_eq!(args.config, PathBuf::from("/tmp/w.yaml"));

        assert!(Args::try_parse_from(["watch_hpss"]).is_err());
    }

    #[test]
    fn test_missing_config_is_startup_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let args = Args {
            instrument: "kcor".into(),
            config: temp_dir.path().join("absent.yaml"),
        };
        let err = run(args).unwrap_err();
        assert!(err.to_string().contains("absent.yaml"));
    }

    #[test]
    fn test_invalid_instrument_is_startup_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = temp_dir.path().join("watch_hpss.yaml");
        std::fs::write(&config, "queue_root: /q\narchive_root: /a\n").unwrap();
        let args = Args {
            instrument: "../kcor".into(),
            config,
        };
        assert!(run(args).is_err());
    }
}
