//! Move-verify-delete protocol for a single staged file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::backend::StorageBackend;
use crate::error::{ArchiveError, Result};

/// A completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub bytes: u64,
}

/// Year bucket of a staged file: its leading four characters, which must be
/// ASCII digits.
pub fn year_bucket(basename: &str) -> Option<&str> {
    let year = basename.get(..4)?;
    year.bytes().all(|b| b.is_ascii_digit()).then_some(year)
}

/// `<destination_root>/<year>/<basename>` for `candidate`.
pub fn destination_path(destination_root: &Path, candidate: &Path) -> Option<PathBuf> {
    let basename = candidate.file_name()?.to_str()?;
    let year = year_bucket(basename)?;
    Some(destination_root.join(year).join(basename))
}

/// Archive `candidate` under `destination_root` and remove it locally.
///
/// The local file is deleted only after the backend reports the same byte
/// size as the file had before the transfer. On any error the local file is
/// untouched; on a size mismatch the remote copy is left for inspection.
pub fn move_file<B: StorageBackend + ?Sized>(
    candidate: &Path,
    destination_root: &Path,
    backend: &B,
) -> Result<Transfer> {
    let local_size = fs::metadata(candidate)
        .map_err(|e| ArchiveError::new_local_file_error(candidate, e))?
        .len();

    let destination = destination_path(destination_root, candidate).ok_or_else(|| {
        ArchiveError::new_transfer_error(
            candidate,
            destination_root,
            "file name does not start with a four digit year",
        )
    })?;

    backend.put(candidate, &destination)?;

    let remote_size = backend.file_size(&destination)?;
    if remote_size != local_size {
        return Err(ArchiveError::Integrity {
            src: candidate.to_path_buf(),
            dst: destination,
            local: local_size,
            remote: remote_size,
        });
    }

    fs::remove_file(candidate).map_err(|e| ArchiveError::new_local_file_error(candidate, e))?;
    info!(
        "archived {} to {} ({local_size} bytes)",
        candidate.display(),
        destination.display()
    );
    Ok(Transfer {
        source: candidate.to_path_buf(),
        destination,
        bytes: local_size,
    })
}
