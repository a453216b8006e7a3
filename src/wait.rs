//! Exit-status collection for container processes.

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use crate::error::{ContainerError, Result};

/// Blocks until `pid` terminates and returns its exit code. Death by signal
/// maps to `128 + signal number`, shell-style.
pub fn wait_on_pid(pid: Pid) -> Result<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(ContainerError::Clone(format!("wait on {pid}: {e}"))),
        }
    }
}
