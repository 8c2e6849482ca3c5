//! Blocking subprocess execution shared by the storage backends.

use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, trace};

/// Captured result of one finished subprocess.
#[derive(Debug)]
pub struct CommandOutput {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout and stderr joined, for diagnostics.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => format!("no output ({})", self.status),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

/// Run `command` to completion with stdin closed and both output streams
/// captured. An `Err` means the process could not be started at all.
pub fn run(command: &mut Command) -> Result<CommandOutput, String> {
    debug!("running {command:?}");
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| format!("failed to start {:?}: {e}", command.get_program()))?;

    let result = CommandOutput {
        success: output.status.success(),
        status: output.status.to_string(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    trace!("{:?} finished with {}", command.get_program(), result.status);
    Ok(result)
}

/// Size column of an `ls -l` style listing line for `path`.
///
/// Both `ls -ln` and `hsi ls -l` print permissions, link count, owner, group
/// and then the size, so the size is the fifth whitespace-separated field.
/// Lines that do not mention the file name are ignored, which skips headers
/// such as the `/path:` line `hsi` prints before a listing.
pub fn parse_listing_size(listing: &str, path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    listing
        .lines()
        .filter(|line| line.trim_end().ends_with(name))
        .filter_map(|line| line.split_whitespace().nth(4))
        .find_map(|field| field.parse::<u64>().ok())
}
