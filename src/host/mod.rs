//! Host operating system collaborators: command execution and filesystem
//! mounting.

mod mount;
mod runner;

use camino::Utf8PathBuf;
use thiserror::Error;

pub use mount::{CommandMounter, DEFAULT_FILESYSTEM, Mounter};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner};

/// Errors raised by host collaborators.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HostError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a command completes with a non-zero exit code.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Command name used for the attempted operation.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}
