//! Pseudo-terminal brokering between the supervisor and the container.
//!
//! The master stays with the supervisor for I/O shuttling; the slave becomes
//! the child's standard streams and controlling terminal.

use std::ffi::CStr;
use std::fs::File;
use std::io;
use std::os::unix::io::{OwnedFd, RawFd};
use std::thread;

use nix::fcntl::OFlag;

use crate::error::{ContainerError, Result};
use crate::kernel::syscall;

/// Allocates a master/slave pseudo-terminal pair. Returns the master handle
/// and the slave pathname (`/dev/pts/<n>`).
pub fn create_master_and_console() -> Result<(OwnedFd, String)> {
    let master = syscall::open_ptmx()
        .map_err(|e| ContainerError::Tty(format!("open /dev/ptmx: {e}")))?;
    syscall::unlockpt(&master).map_err(|e| ContainerError::Tty(format!("unlockpt: {e}")))?;
    let console = syscall::ptsname(&master).map_err(|e| ContainerError::Tty(format!("ptsname: {e}")))?;
    Ok((master, console))
}

/// Child-side console installation: drops the master and the inherited
/// standard streams, then puts the slave on fds 0, 1, and 2.
///
/// Closing 0/1/2 first arranges for the slave's own open to land on fd 0.
pub(crate) fn hand_off(master: RawFd, console: &CStr) -> Result<()> {
    for fd in [master, 0, 1, 2] {
        let _ = syscall::close(fd);
    }

    let slave = syscall::open_terminal(console, OFlag::O_RDWR)
        .map_err(|e| ContainerError::Tty(format!("open console {console:?}: {e}")))?;
    if slave != 0 {
        return Err(ContainerError::Tty(format!(
            "console opened on fd {slave}, expected 0"
        )));
    }

    syscall::dup2(slave, 1)
        .map_err(|e| ContainerError::Tty(format!("dup2 console onto stdout: {e}")))?;
    syscall::dup2(slave, 2)
        .map_err(|e| ContainerError::Tty(format!("dup2 console onto stderr: {e}")))?;
    Ok(())
}

/// Supervisor-side I/O shuttling: copies master output to stdout and stdin
/// to the master in two independent loops. EOF or an error ends only the
/// affected loop; the supervisor is never taken down by console I/O.
pub fn shuttle(master: OwnedFd) {
    let master = File::from(master);
    let output = match master.try_clone() {
        Ok(file) => file,
        Err(e) => {
            log::warn!("duplicating console master: {e}");
            return;
        }
    };

    thread::spawn(move || {
        let mut output = output;
        if let Err(e) = io::copy(&mut output, &mut io::stdout()) {
            log::warn!("console output: {e}");
        }
    });

    thread::spawn(move || {
        let mut input = master;
        if let Err(e) = io::copy(&mut io::stdin(), &mut input) {
            log::warn!("console input: {e}");
        }
    });
}
