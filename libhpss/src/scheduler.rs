//! Poll loop that drains one staging directory into the archive.
//!
//! Every tick the scheduler sleeps for the poll delay; every
//! `polls_per_data_check` ticks it takes the directory lock and runs a
//! data-check cycle, transferring each staged file in enumeration order. The
//! first failed transfer ends the cycle: the remaining files wait for the
//! next one.
//!
//! Shutdown is cooperative. The token is checked at every tick, before a
//! cycle enumerates and after every file, never while a subprocess runs.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use tracing::{debug, info, warn};

use crate::backend::{Connection, StorageBackend};
use crate::error::ArchiveError;
use crate::lock::{DirectoryLock, LOCK_MARKER};
use crate::shutdown::ShutdownToken;
use crate::transfer::{self, Transfer, year_bucket};

/// Longest uninterrupted sleep, so a pending shutdown is noticed promptly
/// even with a long poll delay.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_delay: Duration,
    pub polls_per_data_check: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_delay: Duration::from_secs(1),
            polls_per_data_check: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    CheckingLock,
    Terminating,
}

/// How one data-check cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Another instance holds the staging directory.
    Locked,
    /// Every candidate was archived.
    Completed { transferred: Vec<Transfer> },
    /// A transfer failed; the remaining candidates were not attempted.
    Aborted {
        transferred: Vec<Transfer>,
        error: ArchiveError,
    },
    /// Shutdown was requested part way through.
    Interrupted { transferred: Vec<Transfer> },
    /// The directory could not be locked or listed.
    Failed { error: std::io::Error },
}

impl CycleOutcome {
    pub fn transferred(&self) -> &[Transfer] {
        match self {
            CycleOutcome::Completed { transferred }
            | CycleOutcome::Aborted { transferred, .. }
            | CycleOutcome::Interrupted { transferred } => transferred,
            CycleOutcome::Locked | CycleOutcome::Failed { .. } => &[],
        }
    }
}

pub struct Scheduler<B: StorageBackend> {
    config: SchedulerConfig,
    staging_dir: PathBuf,
    archive_dir: PathBuf,
    backend: B,
    shutdown: ShutdownToken,
    state: Cell<State>,
    polls: Cell<u32>,
}

impl<B: StorageBackend> Scheduler<B> {
    pub fn new(
        config: SchedulerConfig,
        staging_dir: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
        backend: B,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            config,
            staging_dir: staging_dir.into(),
            archive_dir: archive_dir.into(),
            backend,
            shutdown,
            state: Cell::new(State::Running),
            polls: Cell::new(0),
        }
    }

    pub fn state(&self) -> State {
        self.state.get()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Poll until shutdown is requested; returns the signal that ended the
    /// loop.
    pub fn run(&self) -> Option<Signal> {
        info!(
            "watching {} every {:?}, checking data every {} polls",
            self.staging_dir.display(),
            self.config.poll_delay,
            self.config.polls_per_data_check
        );
        let connection = Connection::open(&self.backend);

        while self.tick(&connection) != State::Terminating {}

        drop(connection);
        let signal = self.shutdown.signal();
        match signal {
            Some(signal) => info!("received {signal}, stopped watching"),
            None => info!("stopped watching"),
        }
        signal
    }

    /// Advance the loop by one poll.
    fn tick(&self, backend: &B) -> State {
        if self.shutdown.is_terminated() {
            self.state.set(State::Terminating);
            return State::Terminating;
        }

        let polls = self.polls.get() + 1;
        if polls >= self.config.polls_per_data_check {
            self.polls.set(0);
            self.state.set(State::CheckingLock);
            let outcome =
                check_data(&self.staging_dir, &self.archive_dir, backend, &self.shutdown);
            log_outcome(&outcome);
        } else {
            self.polls.set(polls);
        }

        let next = if self.shutdown.is_terminated() {
            State::Terminating
        } else {
            self.sleep();
            State::Running
        };
        self.state.set(next);
        next
    }

    /// Run one data-check cycle immediately.
    pub fn run_cycle(&self) -> CycleOutcome {
        self.state.set(State::CheckingLock);
        let outcome = check_data(
            &self.staging_dir,
            &self.archive_dir,
            &self.backend,
            &self.shutdown,
        );
        self.state.set(if self.shutdown.is_terminated() {
            State::Terminating
        } else {
            State::Running
        });
        outcome
    }

    fn sleep(&self) {
        let deadline = Instant::now() + self.config.poll_delay;
        loop {
            let now = Instant::now();
            if now >= deadline || self.shutdown.is_terminated() {
                return;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

fn check_data<B: StorageBackend + ?Sized>(
    staging_dir: &Path,
    archive_dir: &Path,
    backend: &B,
    shutdown: &ShutdownToken,
) -> CycleOutcome {
    let lock = match DirectoryLock::acquire(staging_dir) {
        Ok(Some(lock)) => lock,
        Ok(None) => return CycleOutcome::Locked,
        Err(error) => return CycleOutcome::Failed { error },
    };

    let outcome = transfer_candidates(staging_dir, archive_dir, backend, shutdown);

    if let Err(e) = lock.release() {
        warn!("failed to release lock on {}: {e}", staging_dir.display());
    }
    outcome
}

fn transfer_candidates<B: StorageBackend + ?Sized>(
    staging_dir: &Path,
    archive_dir: &Path,
    backend: &B,
    shutdown: &ShutdownToken,
) -> CycleOutcome {
    let mut transferred = Vec::new();
    if shutdown.is_terminated() {
        return CycleOutcome::Interrupted { transferred };
    }

    let entries = match fs::read_dir(staging_dir) {
        Ok(entries) => entries,
        Err(error) => return CycleOutcome::Failed { error },
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!("failed to read entry of {}: {error}", staging_dir.display());
                continue;
            }
        };
        let path = entry.path();
        if !is_candidate(&entry) {
            continue;
        }

        match transfer::move_file(&path, archive_dir, backend) {
            Ok(transfer) => transferred.push(transfer),
            Err(error) => return CycleOutcome::Aborted { transferred, error },
        }

        if shutdown.is_terminated() {
            return CycleOutcome::Interrupted { transferred };
        }
    }

    CycleOutcome::Completed { transferred }
}

/// Regular files with a year-prefixed name. Anything else is left where it
/// is.
fn is_candidate(entry: &fs::DirEntry) -> bool {
    let name = entry.file_name();
    let Some(name) = name.to_str() else {
        debug!("skipping {:?}: name is not valid UTF-8", entry.path());
        return false;
    };
    if name == LOCK_MARKER {
        return false;
    }
    match entry.file_type() {
        Ok(file_type) if file_type.is_file() => {}
        Ok(_) => {
            debug!("skipping {name}: not a regular file");
            return false;
        }
        Err(e) => {
            warn!("skipping {name}: {e}");
            return false;
        }
    }
    if year_bucket(name).is_none() {
        debug!("skipping {name}: no year prefix");
        return false;
    }
    true
}

fn log_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Locked => info!("staging directory is locked, skipping data check"),
        CycleOutcome::Completed { transferred } => {
            if !transferred.is_empty() {
                info!("archived {} files", transferred.len());
            }
        }
        CycleOutcome::Aborted { transferred, error } => {
            warn!(
                "data check aborted after {} files: {error}",
                transferred.len()
            );
        }
        CycleOutcome::Interrupted { transferred } => {
            info!(
                "data check interrupted by shutdown after {} files",
                transferred.len()
            );
        }
        CycleOutcome::Failed { error } => warn!("data check failed: {error}"),
    }
}
