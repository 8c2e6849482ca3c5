//! HPSS backend: drives the `hsi` command line client.
//!
//! Transfers use `cput -P`, which refuses to replace an existing HPSS file
//! and creates missing intermediate directories. Sizes come from `ls -l`,
//! whose listing `hsi` writes to stderr.
//!
//! The whole request is one argument that `hsi` splits into words itself, so
//! every path is double quoted.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::backend::StorageBackend;
use crate::backend::command::{self, CommandOutput, parse_listing_size};
use crate::error::{ArchiveError, Result};

pub const DEFAULT_CLIENT: &str = "hsi";

#[derive(Debug, Clone)]
pub struct HpssBackend {
    client: PathBuf,
}

impl HpssBackend {
    pub fn new<P: AsRef<Path>>(client: P) -> Self {
        Self {
            client: client.as_ref().to_path_buf(),
        }
    }

    pub fn client(&self) -> &Path {
        &self.client
    }

    /// Run one quiet `hsi` command line.
    fn hsi(&self, command_line: String) -> std::result::Result<CommandOutput, String> {
        command::run(Command::new(&self.client).arg("-q").arg(command_line))
    }
}

/// `path` as one double-quoted word of an `hsi` command line.
fn quote(path: &Path) -> String {
    let mut quoted = String::from("\"");
    for c in path.display().to_string().chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

impl Default for HpssBackend {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT)
    }
}

impl StorageBackend for HpssBackend {
    fn name(&self) -> &str {
        "hpss"
    }

    fn put(&self, src: &Path, dst: &Path) -> Result<()> {
        let output = self
            .hsi(format!("cput -P {} : {}", quote(src), quote(dst)))
            .map_err(|e| ArchiveError::new_transfer_error(src, dst, e))?;
        if !output.success {
            return Err(ArchiveError::new_transfer_error(
                src,
                dst,
                output.combined(),
            ));
        }
        debug!("hsi cput {} : {}", src.display(), dst.display());
        Ok(())
    }

    fn file_size(&self, dst: &Path) -> Result<u64> {
        let output = self
            .hsi(format!("ls -l {}", quote(dst)))
            .map_err(|e| ArchiveError::new_size_query_error(dst, e))?;
        if !output.success {
            return Err(ArchiveError::new_size_query_error(dst, output.combined()));
        }
        parse_listing_size(&output.stderr, dst)
            .or_else(|| parse_listing_size(&output.stdout, dst))
            .ok_or_else(|| {
                ArchiveError::new_size_query_error(
                    dst,
                    format!("unparsable listing: {}", output.combined()),
                )
            })
    }
}
