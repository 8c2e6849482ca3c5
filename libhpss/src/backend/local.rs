//! Local filesystem backend, standing in for the archive in tests and dry
//! runs.

use std::fs;
use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::backend::StorageBackend;
use crate::backend::command::{self, parse_listing_size};
use crate::error::{ArchiveError, Result};

#[derive(Debug, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        LocalBackend
    }
}

impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn put(&self, src: &Path, dst: &Path) -> Result<()> {
        // `cp -n` reports success when it skips an existing file on some
        // coreutils releases, so refuse up front.
        if dst.symlink_metadata().is_ok() {
            return Err(ArchiveError::new_transfer_error(
                src,
                dst,
                "destination already exists",
            ));
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ArchiveError::new_transfer_error(
                    src,
                    dst,
                    format!("failed to create {}: {e}", parent.display()),
                )
            })?;
        }

        let output = command::run(Command::new("cp").arg("-n").arg(src).arg(dst))
            .map_err(|e| ArchiveError::new_transfer_error(src, dst, e))?;
        if !output.success {
            return Err(ArchiveError::new_transfer_error(
                src,
                dst,
                output.combined(),
            ));
        }
        debug!("copied {} to {}", src.display(), dst.display());
        Ok(())
    }

    fn file_size(&self, dst: &Path) -> Result<u64> {
        let output = command::run(Command::new("ls").arg("-ln").arg(dst))
            .map_err(|e| ArchiveError::new_size_query_error(dst, e))?;
        if !output.success {
            return Err(ArchiveError::new_size_query_error(dst, output.combined()));
        }
        parse_listing_size(&output.stdout, dst).ok_or_else(|| {
            ArchiveError::new_size_query_error(
                dst,
                format!("unparsable listing: {}", output.combined()),
            )
        })
    }
}
