use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub const LOCK_MARKER: &str = ".lock";

/// Advisory lock over a staging directory, held while a `.lock` marker that
/// this instance created exists in it.
///
/// The marker is removed when the lock is released or dropped, so every exit
/// path out of the protected section gives the directory back.
#[derive(Debug)]
pub struct DirectoryLock {
    marker: PathBuf,
    identity: (u64, u64),
    released: bool,
}

impl DirectoryLock {
    /// Try to take the lock on `directory`.
    ///
    /// Returns `Ok(None)` without touching the filesystem when another
    /// instance already holds it.
    pub fn acquire<P: AsRef<Path>>(directory: P) -> io::Result<Option<Self>> {
        let marker = directory.as_ref().join(LOCK_MARKER);
        if marker.exists() {
            debug!("{} is locked", directory.as_ref().display());
            return Ok(None);
        }

        let file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o644)
            .open(&marker)
        {
            Ok(file) => file,
            // lost the race against another instance between the check and
            // the create
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e),
        };
        let metadata = file.metadata()?;

        debug!("acquired {}", marker.display());
        Ok(Some(DirectoryLock {
            marker,
            identity: (metadata.dev(), metadata.ino()),
            released: false,
        }))
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }

    /// Give the directory back. The marker is only removed if it is still
    /// the one this lock created.
    pub fn release(mut self) -> io::Result<()> {
        self.remove_marker()
    }

    fn remove_marker(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let metadata = match fs::symlink_metadata(&self.marker) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("lock marker {} vanished while held", self.marker.display());
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if (metadata.dev(), metadata.ino()) != self.identity {
            warn!(
                "lock marker {} was replaced by another owner, leaving it",
                self.marker.display()
            );
            return Ok(());
        }

        fs::remove_file(&self.marker)?;
        debug!("released {}", self.marker.display());
        Ok(())
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        if let Err(e) = self.remove_marker() {
            warn!("failed to remove lock marker {}: {e}", self.marker.display());
        }
    }
}
