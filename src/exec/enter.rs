//! Enter sequencer: runs an additional command inside a running container.

use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::process;

use nix::sched::CloneFlags;
use nix::unistd::{ForkResult, Pid};

use super::{complete, ExecImage};
use crate::container::{Command, Container};
use crate::error::{ContainerError, Result};
use crate::kernel::{capabilities, syscall};
use crate::namespace;
use crate::rootfs;
use crate::wait;

/// Runs `command` inside the namespaces of a running container.
///
/// Opens the container's namespace handles, forks, and attaches the child to
/// each before exec. Returns the PID of the entered process; callers collect
/// its status with [`wait::wait_on_pid`]. Every opened handle is closed on
/// both sides of the fork, including the error paths.
pub fn enter(container: &Container, command: &Command) -> Result<Pid> {
    if container.ns_pid <= 0 {
        return Err(ContainerError::Config(format!(
            "invalid container PID {}",
            container.ns_pid
        )));
    }

    let mut handles = namespace::open_namespace_fds(container.ns_pid, &container.namespaces)?;
    if container.net_ns_fd > 0 {
        // SAFETY: the descriptor hands its network namespace fd to the enter
        // path; like every opened handle it is closed after the attach or at
        // scope exit on the error path.
        handles.push(unsafe { OwnedFd::from_raw_fd(container.net_ns_fd) });
    }

    let image = ExecImage::new(command, command.env.clone())?;

    match syscall::fork().map_err(|e| ContainerError::Clone(format!("fork: {e}")))? {
        ForkResult::Parent { child } => {
            drop(handles);
            Ok(child)
        }
        ForkResult::Child => attach_and_exec(container, handles, &image),
    }
}

/// Child side: attach every handle, then exec. When both the mount and PID
/// namespaces were joined, an extra fork puts the exec in a grandchild so
/// proc and sys can be remounted inside them first.
fn attach_and_exec(container: &Container, handles: Vec<OwnedFd>, image: &ExecImage) -> ! {
    for fd in handles {
        complete(
            syscall::join_namespace(fd.as_raw_fd(), CloneFlags::empty())
                .map_err(|e| ContainerError::Clone(format!("join existing namespace: {e}"))),
        );
        drop(fd);
    }

    if container.namespaces.contains_name("CLONE_NEWNS")
        && container.namespaces.contains_name("CLONE_NEWPID")
    {
        match complete(syscall::fork().map_err(|e| ContainerError::Clone(format!("fork: {e}")))) {
            ForkResult::Child => {
                complete(
                    syscall::unshare(CloneFlags::CLONE_NEWNS)
                        .map_err(|e| ContainerError::Clone(format!("unshare mount: {e}"))),
                );
                complete(rootfs::remount_proc());
                complete(rootfs::remount_sys());
                complete(capabilities::drop_capabilities(container));
                image.exec().exit_child()
            }
            ForkResult::Parent { child } => {
                let status = complete(wait::wait_on_pid(child));
                process::exit(status);
            }
        }
    }

    complete(capabilities::drop_capabilities(container));
    image.exec().exit_child()
}
