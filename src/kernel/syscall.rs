//! Typed wrappers for the kernel primitives used by the execution core.
//!
//! Every operation either succeeds or fails with the platform error code;
//! no retries or caching at this layer. Callers attach step context when
//! they convert an `Errno` into a crate error. Raw `libc` calls carry
//! explicit safety preconditions.

use std::convert::Infallible;
use std::ffi::{CStr, CString};
use std::os::unix::io::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::mount::{MntFlags, MsFlags};
use nix::sched::CloneFlags;
use nix::sys::prctl;
use nix::sys::signal::Signal;
use nix::sys::stat::{self, Mode, SFlag};
use nix::unistd::{self, ForkResult, Gid, Pid, Uid};

/// Serializes every process-creation syscall. A clone that overlaps another
/// spawn could duplicate half-updated fd or lock state into the child.
static FORK_LOCK: Mutex<()> = Mutex::new(());

fn spawn_result(pid: libc::c_long) -> nix::Result<ForkResult> {
    match pid {
        -1 => Err(Errno::last()),
        0 => Ok(ForkResult::Child),
        child => Ok(ForkResult::Parent {
            child: Pid::from_raw(child as libc::pid_t),
        }),
    }
}

/// Forks the calling process, returning `Child` in the new process and
/// `Parent { child }` in the caller.
pub fn fork() -> nix::Result<ForkResult> {
    clone_process(libc::SIGCHLD as libc::c_ulong)
}

/// Same contract as [`fork`], with namespace-creation flags applied to the
/// new process. Callers OR in the child-termination signal themselves.
pub fn clone_process(flags: libc::c_ulong) -> nix::Result<ForkResult> {
    let _guard = FORK_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    // SAFETY: clone with a null child stack continues the child from this
    // point on a copy-on-write copy of the parent's stack, like fork. The
    // remaining clone arguments are unused and zero. FORK_LOCK is the only
    // lock held across the call and is released by both sides.
    let pid = unsafe { libc::syscall(libc::SYS_clone, flags, 0usize, 0usize, 0usize, 0usize) };
    spawn_result(pid)
}

/// Detaches the calling process from the namespaces named by `flags`.
pub fn unshare(flags: CloneFlags) -> nix::Result<()> {
    nix::sched::unshare(flags)
}

/// Attaches the calling process to the namespace behind `fd`. An empty
/// `kind` accepts any namespace kind.
pub fn join_namespace(fd: RawFd, kind: CloneFlags) -> nix::Result<()> {
    // SAFETY: the caller guarantees `fd` is an open namespace handle for the
    // duration of the call.
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    nix::sched::setns(fd, kind)
}

/// Replaces the process image. Does not return on success.
pub fn exec(program: &CStr, argv: &[CString], envp: &[CString]) -> nix::Result<Infallible> {
    unistd::execve(program, argv, envp)
}

pub fn chroot(path: &Path) -> nix::Result<()> {
    unistd::chroot(path)
}

pub fn chdir(path: &Path) -> nix::Result<()> {
    unistd::chdir(path)
}

pub fn mount(
    source: Option<&Path>,
    target: &Path,
    fstype: Option<&str>,
    flags: MsFlags,
    data: Option<&str>,
) -> nix::Result<()> {
    nix::mount::mount(source, target, fstype, flags, data)
}

pub fn unmount(target: &Path, flags: MntFlags) -> nix::Result<()> {
    nix::mount::umount2(target, flags)
}

/// Installs `new_root` as the root mount and parks the old root on
/// `put_old`, without passing through an escapable intermediate chroot.
pub fn pivot_root(new_root: &Path, put_old: &Path) -> nix::Result<()> {
    unistd::pivot_root(new_root, put_old)
}

pub fn sethostname(name: &str) -> nix::Result<()> {
    unistd::sethostname(name)
}

/// Creates a new session with the calling process as leader.
pub fn setsid() -> nix::Result<Pid> {
    unistd::setsid()
}

pub fn dup2(oldfd: RawFd, newfd: RawFd) -> nix::Result<RawFd> {
    unistd::dup2(oldfd, newfd)
}

pub fn close(fd: RawFd) -> nix::Result<()> {
    unistd::close(fd)
}

pub fn mknod(path: &Path, kind: SFlag, perm: Mode, dev: libc::dev_t) -> nix::Result<()> {
    stat::mknod(path, kind, perm, dev)
}

pub fn mkfifo(path: &Path, mode: Mode) -> nix::Result<()> {
    unistd::mkfifo(path, mode)
}

/// Sets the file-creation mask and returns the previous one.
pub fn umask(mask: Mode) -> Mode {
    stat::umask(mask)
}

pub fn setgroups(groups: &[Gid]) -> nix::Result<()> {
    unistd::setgroups(groups)
}

pub fn setresgid(rgid: Gid, egid: Gid, sgid: Gid) -> nix::Result<()> {
    unistd::setresgid(rgid, egid, sgid)
}

pub fn setresuid(ruid: Uid, euid: Uid, suid: Uid) -> nix::Result<()> {
    unistd::setresuid(ruid, euid, suid)
}

/// Arms SIGKILL delivery to the calling process when its parent dies.
pub fn parent_death_signal() -> nix::Result<()> {
    prctl::set_pdeathsig(Signal::SIGKILL)
}

/// Makes fd 0 the controlling terminal of the calling process. The caller
/// must already be a session leader with the slave pty on fd 0.
pub fn set_controlling_terminal() -> nix::Result<()> {
    // SAFETY: TIOCSCTTY on fd 0 with a zero argument takes the terminal as
    // controlling tty without stealing it from another session.
    let rc = unsafe { libc::ioctl(0, libc::TIOCSCTTY as _, 0) };
    Errno::result(rc).map(drop)
}

/// Opens the pseudo-terminal multiplexer read-write, without making it the
/// controlling terminal and without leaking it across exec.
pub fn open_ptmx() -> nix::Result<OwnedFd> {
    // SAFETY: the path literal is NUL-terminated; open returns a fresh fd
    // owned by nobody else.
    let fd = unsafe {
        libc::open(
            c"/dev/ptmx".as_ptr(),
            libc::O_RDWR | libc::O_NOCTTY | libc::O_CLOEXEC,
        )
    };
    let fd = Errno::result(fd)?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Unlocks the slave side of a pseudo-terminal master.
pub fn unlockpt(master: &OwnedFd) -> nix::Result<()> {
    let mut unlock: libc::c_int = 0;
    // SAFETY: TIOCSPTLCK reads a c_int unlock flag from the pointer; the
    // slot outlives the call.
    let rc = unsafe {
        libc::ioctl(
            master.as_raw_fd(),
            libc::TIOCSPTLCK as _,
            &mut unlock,
        )
    };
    Errno::result(rc).map(drop)
}

/// Returns the pathname of the slave device paired with `master`.
pub fn ptsname(master: &OwnedFd) -> nix::Result<String> {
    let mut index: libc::c_int = 0;
    // SAFETY: TIOCGPTN writes the slave index into the c_int slot; the slot
    // outlives the call.
    let rc = unsafe {
        libc::ioctl(
            master.as_raw_fd(),
            libc::TIOCGPTN as _,
            &mut index,
        )
    };
    Errno::result(rc)?;
    Ok(format!("/dev/pts/{index}"))
}

/// Opens a terminal device by path. Not close-on-exec: the returned fd
/// becomes the child's standard streams and must survive the exec.
pub fn open_terminal(path: &CStr, flags: OFlag) -> nix::Result<RawFd> {
    // SAFETY: `path` is a valid NUL-terminated string for the duration of
    // the call.
    let fd = unsafe { libc::open(path.as_ptr(), flags.bits()) };
    Errno::result(fd)
}
