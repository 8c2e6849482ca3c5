use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of a single archival transfer.
///
/// None of these are fatal to the daemon: the scheduler logs them, abandons
/// the rest of the current data-check cycle and leaves the local file in
/// place for the next one.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to transfer {} to {}: {output}", .src.display(), .dst.display())]
    Transfer {
        src: PathBuf,
        dst: PathBuf,
        output: String,
    },

    #[error("failed to query size of {}: {reason}", .dst.display())]
    SizeQuery { dst: PathBuf, reason: String },

    #[error(
        "size mismatch for {} -> {}: local {local} bytes, remote {remote} bytes",
        .src.display(),
        .dst.display()
    )]
    Integrity {
        src: PathBuf,
        dst: PathBuf,
        local: u64,
        remote: u64,
    },

    #[error("failed to access local file {}: {source}", .path.display())]
    LocalFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ArchiveError {
    pub fn new_transfer_error(
        src: impl Into<PathBuf>,
        dst: impl Into<PathBuf>,
        output: impl Into<String>,
    ) -> Self {
        ArchiveError::Transfer {
            src: src.into(),
            dst: dst.into(),
            output: output.into(),
        }
    }

    pub fn new_size_query_error(dst: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ArchiveError::SizeQuery {
            dst: dst.into(),
            reason: reason.into(),
        }
    }

    pub fn new_local_file_error(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ArchiveError::LocalFile {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Problems with the daemon configuration, detected before the poll loop
/// starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid instrument name `{0}`")]
    InvalidInstrument(String),

    #[error("unknown signal `{0}`")]
    UnknownSignal(String),

    #[error("polls_per_data_check must be at least 1")]
    ZeroPollsPerCheck,

    #[error("poll_delay_secs must be a finite, non-negative number, got {0}")]
    InvalidPollDelay(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = ArchiveError::new_transfer_error("/q/a.fts", "/A/2024/a.fts", "cput: exists");
        assert_eq!(
            err.to_string(),
            "failed to transfer /q/a.fts to /A/2024/a.fts: cput: exists"
        );

        let err = ArchiveError::Integrity {
            src: "/q/a.fts".into(),
            dst: "/A/2024/a.fts".into(),
            local: 1000,
            remote: 998,
        };
        assert!(err.to_string().contains("local 1000 bytes, remote 998 bytes"));
    }
}
