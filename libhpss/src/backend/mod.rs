//! Storage backends (archival tier adapters)
//!
//! Submodules:
//! - `command`: blocking subprocess runner and listing parser shared by both
//!   backends
//! - `local`: local filesystem backend used for testing and dry runs
//! - `hpss`: HPSS backend driving the `hsi` client
//!
//! Every `put`/`file_size` call issues exactly one subprocess and blocks
//! until it exits.
pub mod command;
pub mod hpss;
pub mod local;

use std::ops::Deref;
use std::path::Path;

use tracing::info;

use crate::config::BackendConfig;
use crate::error::Result;

pub use hpss::HpssBackend;
pub use local::LocalBackend;

pub trait StorageBackend {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Copy `src` to `dst`, failing rather than overwriting an existing
    /// `dst`.
    fn put(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Size in bytes of `dst` as the backend reports it.
    fn file_size(&self, dst: &Path) -> Result<u64>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn put(&self, src: &Path, dst: &Path) -> Result<()> {
        (**self).put(src, dst)
    }

    fn file_size(&self, dst: &Path) -> Result<u64> {
        (**self).file_size(dst)
    }
}

/// Build the backend named by the configuration.
pub fn from_config(config: &BackendConfig) -> Box<dyn StorageBackend> {
    match config {
        BackendConfig::Local => Box::new(LocalBackend::new()),
        BackendConfig::Hpss { client } => Box::new(HpssBackend::new(client)),
    }
}

/// Scope in which a backend is considered connected.
///
/// The backends hold no session state, so opening and closing only leave a
/// trace in the log.
pub struct Connection<'a, B: StorageBackend + ?Sized> {
    backend: &'a B,
}

impl<'a, B: StorageBackend + ?Sized> Connection<'a, B> {
    pub fn open(backend: &'a B) -> Self {
        info!("opened connection to {}", backend.name());
        Connection { backend }
    }
}

impl<B: StorageBackend + ?Sized> Deref for Connection<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.backend
    }
}

impl<B: StorageBackend + ?Sized> Drop for Connection<'_, B> {
    fn drop(&mut self) {
        info!("closed connection to {}", self.backend.name());
    }
}
