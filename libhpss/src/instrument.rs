use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Name of the instrument whose queue one daemon instance drains.
///
/// Paths are case-insensitive in the name: the staging directory uses it as
/// given, the archive uses it upper-cased and log files lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument(String);

impl Instrument {
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(ConfigError::InvalidInstrument(name));
        }
        Ok(Instrument(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<queue-root>/<instrument>`
    pub fn staging_dir(&self, queue_root: &Path) -> PathBuf {
        queue_root.join(&self.0)
    }

    /// `<archive-root>/<INSTRUMENT>`
    pub fn archive_dir(&self, archive_root: &Path) -> PathBuf {
        archive_root.join(self.0.to_uppercase())
    }

    /// `<YYYYMMDD>.<instrument>.hpss.log`, `date` already formatted.
    pub fn log_filename(&self, date: &str) -> String {
        format!("{date}.{}.hpss.log", self.0.to_lowercase())
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
