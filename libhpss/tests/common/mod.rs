use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};

use libhpss::error::{ArchiveError, Result};
use libhpss::{Instrument, LocalBackend, StorageBackend};
use libhpss::{Scheduler, SchedulerConfig, ShutdownToken};
use nix::sys::signal::Signal;
use tempfile::TempDir;

/// Queue and archive roots in a temporary directory.
pub struct Fixture {
    _temp_dir: TempDir,
    pub staging: PathBuf,
    pub archive: PathBuf,
}

impl Fixture {
    pub fn new(instrument: &str) -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let instrument = Instrument::new(instrument).unwrap();
        let staging = instrument.staging_dir(&temp_dir.path().join("queue"));
        let archive = instrument.archive_dir(&temp_dir.path().join("archive"));
        fs::create_dir_all(&staging).unwrap();
        Self {
            _temp_dir: temp_dir,
            staging,
            archive,
        }
    }

    pub fn stage(&self, name: &str, len: usize) -> PathBuf {
        let path = self.staging.join(name);
        fs::write(&path, vec![b'x'; len]).unwrap();
        path
    }

    pub fn scheduler(
        &self,
        backend: RecordingBackend,
        config: SchedulerConfig,
        shutdown: ShutdownToken,
    ) -> Scheduler<RecordingBackend> {
        Scheduler::new(config, &self.staging, &self.archive, backend, shutdown)
    }

    /// Well-behaved backend, data check on every poll, no shutdown.
    pub fn simple_scheduler(&self) -> Scheduler<RecordingBackend> {
        self.scheduler(RecordingBackend::new(), quick_config(1), ShutdownToken::new())
    }
}

/// Local backend that records puts and can be told to misbehave.
#[derive(Default)]
pub struct RecordingBackend {
    pub inner: LocalBackend,
    pub puts: RefCell<Vec<PathBuf>>,
    /// Added to every reported size.
    pub size_delta: Cell<i64>,
    /// 1-based index of the put that fails.
    pub fail_put: Cell<Option<usize>>,
    /// Requested with SIGTERM after every successful put.
    pub shutdown_on_put: Option<ShutdownToken>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_count(&self) -> usize {
        self.puts.borrow().len()
    }
}

impl StorageBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn put(&self, src: &Path, dst: &Path) -> Result<()> {
        self.puts.borrow_mut().push(dst.to_path_buf());
        if self.fail_put.get() == Some(self.put_count()) {
            return Err(ArchiveError::new_transfer_error(src, dst, "simulated outage"));
        }
        self.inner.put(src, dst)?;
        if let Some(token) = &self.shutdown_on_put {
            token.request(Signal::SIGTERM);
        }
        Ok(())
    }

    fn file_size(&self, dst: &Path) -> Result<u64> {
        let size = self.inner.file_size(dst)?;
        Ok((size as i64 + self.size_delta.get()) as u64)
    }
}

pub fn quick_config(polls_per_data_check: u32) -> SchedulerConfig {
    SchedulerConfig {
        poll_delay: std::time::Duration::from_millis(5),
        polls_per_data_check,
    }
}
