//! Container descriptor consumed by the launch and enter sequencers.
//!
//! The descriptor is built by the caller and read-only to the core, except
//! for `ns_pid`, which `launch` writes once the first process exists.

use std::os::unix::io::RawFd;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::namespace::Namespaces;

/// Program image to run inside the container.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Command {
    /// Argument vector; `args[0]` is the program path inside the container.
    pub args: Vec<String>,
    /// Environment as `KEY=value` entries.
    pub env: Vec<String>,
}

/// Launch-time description of a container.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Container {
    /// Identifier; also installed as the container's hostname.
    pub id: String,

    /// Root filesystem directory, absolute or relative. Resolved to an
    /// absolute symlink-free path before use.
    pub root_fs: PathBuf,

    /// Re-bind the root read-only after the initial bind mount.
    pub readonly_fs: bool,

    /// Isolation domains to create on launch (or to join on enter).
    pub namespaces: Namespaces,

    /// Handle to an existing network namespace; nonzero means "join this one"
    /// and is mutually exclusive with requesting a new network namespace.
    #[serde(skip)]
    pub net_ns_fd: RawFd,

    /// Command to exec as the container's first process.
    pub command: Command,

    /// Working directory after the user switch; `None` leaves the process
    /// at `/`.
    pub working_dir: Option<PathBuf>,

    /// Host PID of the container's first process, written by `launch`.
    #[serde(default)]
    pub ns_pid: i32,
}
