//! Archival watcher for per-instrument staging directories.
//!
//! Files that land in `<queue-root>/<instrument>` are pushed to the archive
//! under `<archive-root>/<INSTRUMENT>/<year>/`, checked by byte size and then
//! removed locally. See [`scheduler::Scheduler`] for the poll loop.

pub mod backend;
pub mod config;
pub mod error;
pub mod instrument;
pub mod lock;
pub mod scheduler;
pub mod shutdown;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use backend::{Connection, HpssBackend, LocalBackend, StorageBackend};
pub use config::{BackendConfig, WatchConfig};
pub use error::{ArchiveError, ConfigError};
pub use instrument::Instrument;
pub use lock::DirectoryLock;
pub use scheduler::{CycleOutcome, Scheduler, SchedulerConfig, State};
pub use shutdown::{DEFAULT_SIGNALS, ShutdownToken, SignalHandler};
pub use transfer::{Transfer, move_file};
