//! Launch sequencer: creates a container and runs its first process.

use std::ffi::{CStr, CString};
use std::fs;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use nix::sched::CloneFlags;
use nix::unistd::{ForkResult, Pid};

use super::{complete, env_with_defaults, setup_user, ExecImage};
use crate::console;
use crate::container::Container;
use crate::error::{ContainerError, Result};
use crate::kernel::{capabilities, syscall};
use crate::namespace::Namespace;
use crate::rootfs;

/// Resolves the descriptor's root filesystem to an absolute, symlink-free
/// path.
pub fn resolve_rootfs(container: &Container) -> Result<PathBuf> {
    fs::canonicalize(&container.root_fs).map_err(|e| {
        ContainerError::Fs(format!(
            "resolve rootfs {}: {e}",
            container.root_fs.display()
        ))
    })
}

/// Creates the requested isolation domains and runs the container's command
/// inside them behind a fresh root filesystem and console.
///
/// Returns the host PID of the container's first process and records it in
/// the descriptor. The calling process keeps the console master and
/// shuttles its I/O; it observes the container's exit through the wait
/// utility.
pub fn launch(container: &mut Container) -> Result<Pid> {
    if container.net_ns_fd > 0 && container.namespaces.contains(Namespace::Net) {
        return Err(ContainerError::Config(
            "both a new network namespace and an existing network namespace handle requested"
                .to_string(),
        ));
    }

    let root = resolve_rootfs(container)?;
    let (master, console_path) = console::create_master_and_console()?;

    // Everything the child needs is materialized before the clone.
    let image = ExecImage::new(&container.command, env_with_defaults(&container.command.env))?;
    let console_c = CString::new(console_path.as_str())
        .map_err(|_| ContainerError::Tty("NUL byte in console path".to_string()))?;

    // The vfork bit parks the parent until the child execs or dies; the
    // child-termination signal makes it waitable.
    let flags = container.namespaces.clone_flags().bits() as libc::c_ulong
        | libc::CLONE_VFORK as libc::c_ulong
        | libc::SIGCHLD as libc::c_ulong;

    log::debug!(
        "launching container {} from {}",
        container.id,
        root.display()
    );

    match syscall::clone_process(flags).map_err(|e| ContainerError::Clone(format!("clone: {e}")))? {
        ForkResult::Child => child_init(
            container,
            &root,
            &console_path,
            &console_c,
            master.as_raw_fd(),
            &image,
        ),
        ForkResult::Parent { child } => {
            container.ns_pid = child.as_raw();
            console::shuttle(master);
            Ok(child)
        }
    }
}

/// Child-side sequence between clone and exec.
///
/// The hostname set still needs a capability, so the capability drop comes
/// after it; the user switch precedes the workdir change so the directory
/// permission check runs as the container identity.
fn child_init(
    container: &Container,
    root: &Path,
    console_path: &str,
    console_c: &CStr,
    master: RawFd,
    image: &ExecImage,
) -> ! {
    complete(console::hand_off(master, console_c));

    if container.net_ns_fd > 0 {
        complete(
            syscall::join_namespace(container.net_ns_fd, CloneFlags::CLONE_NEWNET)
                .map_err(|e| ContainerError::Clone(format!("join existing net namespace: {e}"))),
        );
    }

    complete(syscall::setsid().map_err(|e| ContainerError::Tty(format!("setsid: {e}"))));
    complete(
        syscall::set_controlling_terminal()
            .map_err(|e| ContainerError::Tty(format!("setctty: {e}"))),
    );
    complete(
        syscall::parent_death_signal()
            .map_err(|e| ContainerError::Clone(format!("parent death signal: {e}"))),
    );
    complete(rootfs::setup(
        root,
        Path::new(console_path),
        container.readonly_fs,
    ));
    complete(
        syscall::sethostname(&container.id)
            .map_err(|e| ContainerError::Identity(format!("sethostname: {e}"))),
    );
    complete(capabilities::drop_capabilities(container));
    complete(setup_user());

    if let Some(dir) = &container.working_dir {
        complete(
            syscall::chdir(dir)
                .map_err(|e| ContainerError::Fs(format!("chdir to {}: {e}", dir.display()))),
        );
    }

    image.exec().exit_child()
}
