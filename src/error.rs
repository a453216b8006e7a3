//! Error kinds for container launch and enter operations.

use std::io::Write;

use thiserror::Error;

/// Result type alias for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Errors reported by the execution core.
///
/// Each variant names the subsystem that failed; the message carries the
/// failed step and the underlying platform error. Only `Config` (and some
/// `Fs`) failures are retriable without operator intervention.
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("filesystem error: {0}")]
    Fs(String),

    #[error("mount error: {0}")]
    Mount(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("terminal error: {0}")]
    Tty(String),

    #[error("process creation error: {0}")]
    Clone(String),

    #[error("identity error: {0}")]
    Identity(String),

    #[error("exec error: {0}")]
    Exec(String),
}

impl ContainerError {
    /// Terminates a pre-exec child. There is no recovery path between clone
    /// and exec: report one line on stderr and exit nonzero so the
    /// supervisor's wait observes the failure.
    pub(crate) fn exit_child(&self) -> ! {
        let _ = writeln!(std::io::stderr(), "nsbox: {self}");
        std::process::exit(1);
    }
}
