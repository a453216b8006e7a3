//! Mount-topology assembly for a container root filesystem.
//!
//! Runs inside the child's new mount namespace. The step ordering is
//! load-bearing: the devpts instance must exist before the console node is
//! created, and every mount happens before the assembled tree is moved onto
//! `/`. Several steps tolerate "already exists" because the root filesystem
//! may have been prepared ahead of time.

use std::fs;
use std::io;
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags};
use nix::sys::stat::{Mode, SFlag};
use nix::unistd::{chown, Gid, Uid};

use crate::error::{ContainerError, Result};
use crate::kernel::syscall;

/// Baseline flags for the standard pseudo-filesystem mounts.
const DEFAULT_MOUNT_FLAGS: MsFlags = MsFlags::MS_NOEXEC
    .union(MsFlags::MS_NOSUID)
    .union(MsFlags::MS_NODEV);

/// Character devices copied from the host into the container's `/dev`.
const DEV_NODES: [&str; 6] = ["null", "zero", "full", "random", "urandom", "tty"];

/// Convenience symlinks installed under the container's `/dev`.
const DEV_SYMLINKS: [(&str, &str); 5] = [
    ("/proc/kcore", "dev/core"),
    ("/proc/self/fd", "dev/fd"),
    ("/proc/self/fd/0", "dev/stdin"),
    ("/proc/self/fd/1", "dev/stdout"),
    ("/proc/self/fd/2", "dev/stderr"),
];

/// One entry of the in-container mount table.
struct MountSpec {
    source: &'static str,
    target: PathBuf,
    fstype: &'static str,
    flags: MsFlags,
    data: Option<&'static str>,
}

fn standard_mounts(root: &Path) -> Vec<MountSpec> {
    vec![
        MountSpec {
            source: "proc",
            target: root.join("proc"),
            fstype: "proc",
            flags: DEFAULT_MOUNT_FLAGS,
            data: None,
        },
        MountSpec {
            source: "sysfs",
            target: root.join("sys"),
            fstype: "sysfs",
            flags: DEFAULT_MOUNT_FLAGS,
            data: None,
        },
        MountSpec {
            source: "tmpfs",
            target: root.join("dev"),
            fstype: "tmpfs",
            flags: MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
            data: Some("mode=755"),
        },
        MountSpec {
            source: "shm",
            target: root.join("dev/shm"),
            fstype: "tmpfs",
            flags: DEFAULT_MOUNT_FLAGS,
            data: Some("mode=1777"),
        },
        MountSpec {
            source: "devpts",
            target: root.join("dev/pts"),
            fstype: "devpts",
            flags: MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
            data: Some("newinstance,ptmxmode=0666,mode=620,gid=5"),
        },
        MountSpec {
            source: "tmpfs",
            target: root.join("run"),
            fstype: "tmpfs",
            flags: MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_STRICTATIME,
            data: Some("mode=755"),
        },
    ]
}

/// Assembles the container filesystem under `root` and installs it as `/`.
///
/// `console` is the host path of the slave pseudo-terminal that becomes the
/// container's `/dev/console`.
pub fn setup(root: &Path, console: &Path, readonly: bool) -> Result<()> {
    // Keep mount changes from propagating back to the host.
    syscall::mount(
        None,
        Path::new("/"),
        None,
        MsFlags::MS_SLAVE | MsFlags::MS_REC,
        None,
    )
    .map_err(|e| ContainerError::Mount(format!("remounting / as slave: {e}")))?;

    syscall::mount(
        Some(root),
        root,
        Some("bind"),
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None,
    )
    .map_err(|e| ContainerError::Mount(format!("bind mounting {}: {e}", root.display())))?;

    if readonly {
        syscall::mount(
            Some(root),
            root,
            Some("bind"),
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_REC,
            None,
        )
        .map_err(|e| {
            ContainerError::Mount(format!("remounting {} read-only: {e}", root.display()))
        })?;
    }

    mount_system(root)?;
    copy_dev_nodes(root)?;
    setup_ptmx(root)?;
    setup_dev_symlinks(root)?;
    setup_console(root, console)?;
    enter_root(root)
}

fn mount_system(root: &Path) -> Result<()> {
    for m in standard_mounts(root) {
        fs::create_dir_all(&m.target)
            .map_err(|e| ContainerError::Fs(format!("mkdir {}: {e}", m.target.display())))?;
        syscall::mount(
            Some(Path::new(m.source)),
            &m.target,
            Some(m.fstype),
            m.flags,
            m.data,
        )
        .map_err(|e| {
            ContainerError::Mount(format!(
                "mounting {} on {}: {e}",
                m.source,
                m.target.display()
            ))
        })?;
    }
    Ok(())
}

/// Recreates the essential character devices inside the fresh `dev` tmpfs
/// with the host's mode and device numbers.
fn copy_dev_nodes(root: &Path) -> Result<()> {
    syscall::umask(Mode::empty());

    for node in DEV_NODES {
        let host = Path::new("/dev").join(node);
        let meta = fs::metadata(&host)
            .map_err(|e| ContainerError::Device(format!("stat {}: {e}", host.display())))?;
        let dest = root.join("dev").join(node);

        log::debug!("copy {} to {}", host.display(), dest.display());
        let mode = meta.mode();
        match syscall::mknod(
            &dest,
            SFlag::from_bits_truncate(mode),
            Mode::from_bits_truncate(mode),
            meta.rdev(),
        ) {
            Ok(()) | Err(Errno::EEXIST) => {}
            Err(e) => {
                return Err(ContainerError::Device(format!(
                    "mknod {}: {e}",
                    dest.display()
                )))
            }
        }
    }
    Ok(())
}

/// Replaces `dev/ptmx` with a symlink into the container's own devpts
/// instance.
fn setup_ptmx(root: &Path) -> Result<()> {
    let ptmx = root.join("dev/ptmx");
    remove_if_exists(&ptmx)?;
    symlink("pts/ptmx", &ptmx)
        .map_err(|e| ContainerError::Device(format!("symlink {}: {e}", ptmx.display())))
}

fn setup_dev_symlinks(root: &Path) -> Result<()> {
    for (target, link) in DEV_SYMLINKS {
        let dest = root.join(link);
        remove_if_exists(&dest)?;
        symlink(target, &dest)
            .map_err(|e| ContainerError::Device(format!("symlink {}: {e}", dest.display())))?;
    }
    Ok(())
}

/// Creates `dev/console` as a device node mirroring the slave
/// pseudo-terminal, which is first locked down to root-owned mode 0600.
fn setup_console(root: &Path, console: &Path) -> Result<()> {
    syscall::umask(Mode::empty());

    let meta = fs::metadata(console)
        .map_err(|e| ContainerError::Device(format!("stat console {}: {e}", console.display())))?;

    let dest = root.join("dev/console");
    remove_if_exists(&dest)?;

    fs::set_permissions(console, fs::Permissions::from_mode(0o600))
        .map_err(|e| ContainerError::Device(format!("chmod {}: {e}", console.display())))?;
    chown(console, Some(Uid::from_raw(0)), Some(Gid::from_raw(0)))
        .map_err(|e| ContainerError::Device(format!("chown {}: {e}", console.display())))?;

    let mode = (meta.mode() & !0o7777) | 0o600;
    syscall::mknod(
        &dest,
        SFlag::from_bits_truncate(mode),
        Mode::from_bits_truncate(mode),
        meta.rdev(),
    )
    .map_err(|e| ContainerError::Device(format!("mknod {}: {e}", dest.display())))
}

/// Moves the assembled tree onto `/` and switches the process into it.
fn enter_root(root: &Path) -> Result<()> {
    syscall::chdir(root)
        .map_err(|e| ContainerError::Mount(format!("chdir into {}: {e}", root.display())))?;
    syscall::mount(Some(root), Path::new("/"), None, MsFlags::MS_MOVE, None)
        .map_err(|e| ContainerError::Mount(format!("moving {} onto /: {e}", root.display())))?;
    syscall::chroot(Path::new("."))
        .map_err(|e| ContainerError::Mount(format!("chroot .: {e}")))?;
    syscall::chdir(Path::new("/")).map_err(|e| ContainerError::Mount(format!("chdir /: {e}")))?;
    syscall::umask(Mode::from_bits_truncate(0o022));
    Ok(())
}

/// Detach-unmounts `/proc` and mounts a fresh instance. Used after joining
/// another process's PID namespace so `/proc` reflects it.
pub fn remount_proc() -> Result<()> {
    syscall::unmount(Path::new("/proc"), MntFlags::MNT_DETACH)
        .map_err(|e| ContainerError::Mount(format!("unmounting /proc: {e}")))?;
    syscall::mount(
        Some(Path::new("proc")),
        Path::new("/proc"),
        Some("proc"),
        DEFAULT_MOUNT_FLAGS,
        None,
    )
    .map_err(|e| ContainerError::Mount(format!("mounting /proc: {e}")))
}

/// Same as [`remount_proc`] for `/sys`. EINVAL from the unmount means sys
/// was not mounted, in which case there is nothing to refresh.
pub fn remount_sys() -> Result<()> {
    match syscall::unmount(Path::new("/sys"), MntFlags::MNT_DETACH) {
        Err(Errno::EINVAL) => Ok(()),
        Err(e) => Err(ContainerError::Mount(format!("unmounting /sys: {e}"))),
        Ok(()) => syscall::mount(
            Some(Path::new("sysfs")),
            Path::new("/sys"),
            Some("sysfs"),
            DEFAULT_MOUNT_FLAGS,
            None,
        )
        .map_err(|e| ContainerError::Mount(format!("mounting /sys: {e}"))),
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ContainerError::Device(format!(
            "remove {}: {e}",
            path.display()
        ))),
    }
}
