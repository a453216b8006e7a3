//! Isolation-domain registry: the six Linux namespace kinds, their clone
//! flag bits, and their `/proc/<pid>/ns` handle files.

use std::fs::File;
use std::os::unix::io::OwnedFd;
use std::path::{Path, PathBuf};

use nix::mount::MsFlags;
use nix::sched::CloneFlags;
use nix::unistd::ForkResult;
use serde::{Deserialize, Serialize};

use crate::error::{ContainerError, Result};
use crate::kernel::syscall;
use crate::wait;

/// A kernel namespace kind understood by the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    #[serde(rename = "mnt")]
    Mount,
    #[serde(rename = "uts")]
    Uts,
    #[serde(rename = "ipc")]
    Ipc,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "pid")]
    Pid,
    #[serde(rename = "net")]
    Net,
}

impl Namespace {
    pub const ALL: [Namespace; 6] = [
        Namespace::Mount,
        Namespace::Uts,
        Namespace::Ipc,
        Namespace::User,
        Namespace::Pid,
        Namespace::Net,
    ];

    /// The `CLONE_NEW*` bit that creates this namespace kind.
    pub fn clone_flag(self) -> CloneFlags {
        match self {
            Namespace::Mount => CloneFlags::CLONE_NEWNS,
            Namespace::Uts => CloneFlags::CLONE_NEWUTS,
            Namespace::Ipc => CloneFlags::CLONE_NEWIPC,
            Namespace::User => CloneFlags::CLONE_NEWUSER,
            Namespace::Pid => CloneFlags::CLONE_NEWPID,
            Namespace::Net => CloneFlags::CLONE_NEWNET,
        }
    }

    /// File name of this kind's handle under `/proc/<pid>/ns`.
    pub fn proc_file(self) -> &'static str {
        match self {
            Namespace::Mount => "mnt",
            Namespace::Uts => "uts",
            Namespace::Ipc => "ipc",
            Namespace::User => "user",
            Namespace::Pid => "pid",
            Namespace::Net => "net",
        }
    }

    /// Parses either the symbolic token (`"mnt"`, `"uts"`, ...) or the
    /// literal flag name (`"CLONE_NEWNS"`, ...). Descriptors in the wild use
    /// both forms.
    pub fn from_name(name: &str) -> Option<Namespace> {
        match name {
            "mnt" | "CLONE_NEWNS" => Some(Namespace::Mount),
            "uts" | "CLONE_NEWUTS" => Some(Namespace::Uts),
            "ipc" | "CLONE_NEWIPC" => Some(Namespace::Ipc),
            "user" | "CLONE_NEWUSER" => Some(Namespace::User),
            "pid" | "CLONE_NEWPID" => Some(Namespace::Pid),
            "net" | "CLONE_NEWNET" => Some(Namespace::Net),
            _ => None,
        }
    }
}

/// Ordered set of namespace kinds requested for a container.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Namespaces(Vec<Namespace>);

impl Namespaces {
    pub fn contains(&self, ns: Namespace) -> bool {
        self.0.contains(&ns)
    }

    /// Membership test by either string form accepted by
    /// [`Namespace::from_name`]. Unknown names are simply not members.
    pub fn contains_name(&self, name: &str) -> bool {
        Namespace::from_name(name).is_some_and(|ns| self.contains(ns))
    }

    /// Combined creation mask: the bitwise OR of every member's clone bit.
    pub fn clone_flags(&self) -> CloneFlags {
        self.0
            .iter()
            .fold(CloneFlags::empty(), |flags, ns| flags | ns.clone_flag())
    }

    pub fn iter(&self) -> impl Iterator<Item = Namespace> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Namespace>> for Namespaces {
    fn from(kinds: Vec<Namespace>) -> Self {
        Namespaces(kinds)
    }
}

impl FromIterator<Namespace> for Namespaces {
    fn from_iter<I: IntoIterator<Item = Namespace>>(iter: I) -> Self {
        Namespaces(iter.into_iter().collect())
    }
}

/// Path of a process's handle for the given namespace kind.
pub fn handle_path(pid: i32, ns: Namespace) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/ns/{}", ns.proc_file()))
}

/// Opens a read-only handle for each requested namespace of `pid`.
///
/// Handles already opened when a later open fails are closed before the
/// error returns; ownership of the returned fds closes them on every
/// subsequent exit path as well.
pub fn open_namespace_fds(pid: i32, namespaces: &Namespaces) -> Result<Vec<OwnedFd>> {
    let mut fds = Vec::with_capacity(namespaces.len());
    for ns in namespaces.iter() {
        let path = handle_path(pid, ns);
        let file = File::open(&path)
            .map_err(|e| ContainerError::Fs(format!("open {}: {e}", path.display())))?;
        fds.push(OwnedFd::from(file));
    }
    Ok(fds)
}

/// Creates a fresh namespace of the given kind and bind-mounts its handle to
/// `bind_target` so the namespace outlives its creator. The target must
/// already exist.
pub fn create_namespace(ns: Namespace, bind_target: &Path) -> Result<()> {
    let source = PathBuf::from(format!("/proc/self/ns/{}", ns.proc_file()));

    match syscall::fork().map_err(|e| ContainerError::Clone(format!("fork: {e}")))? {
        ForkResult::Child => {
            let outcome = syscall::unshare(ns.clone_flag())
                .map_err(|e| ContainerError::Clone(format!("unshare {}: {e}", ns.proc_file())))
                .and_then(|()| {
                    syscall::mount(
                        Some(source.as_path()),
                        bind_target,
                        Some("none"),
                        MsFlags::MS_BIND,
                        None,
                    )
                    .map_err(|e| {
                        ContainerError::Mount(format!(
                            "bind mount {} onto {}: {e}",
                            source.display(),
                            bind_target.display()
                        ))
                    })
                });
            match outcome {
                Ok(()) => std::process::exit(0),
                Err(err) => err.exit_child(),
            }
        }
        ForkResult::Parent { child } => {
            let status = wait::wait_on_pid(child)?;
            if status != 0 {
                return Err(ContainerError::Clone(format!(
                    "namespace helper exited with status {status}"
                )));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_fd_count() -> usize {
        std::fs::read_dir("/proc/self/fd").unwrap().count()
    }

    #[test]
    fn creation_mask_is_the_or_of_member_bits() {
        let set = Namespaces::from(vec![Namespace::Mount, Namespace::Pid, Namespace::Net]);
        let expected = 0x0002_0000 | 0x2000_0000 | 0x4000_0000;
        assert_eq!(set.clone_flags().bits(), expected);
    }

    #[test]
    fn each_kind_maps_to_its_documented_bit() {
        let bits = [
            (Namespace::Mount, 0x0002_0000),
            (Namespace::Uts, 0x0400_0000),
            (Namespace::Ipc, 0x0800_0000),
            (Namespace::User, 0x1000_0000),
            (Namespace::Pid, 0x2000_0000),
            (Namespace::Net, 0x4000_0000),
        ];
        for (ns, bit) in bits {
            assert_eq!(ns.clone_flag().bits(), bit, "{}", ns.proc_file());
        }
    }

    #[test]
    fn names_resolve_in_both_forms() {
        for ns in Namespace::ALL {
            assert_eq!(Namespace::from_name(ns.proc_file()), Some(ns));
        }
        assert_eq!(Namespace::from_name("CLONE_NEWNS"), Some(Namespace::Mount));
        assert_eq!(Namespace::from_name("CLONE_NEWPID"), Some(Namespace::Pid));
        assert_eq!(Namespace::from_name("cgroup"), None);

        let set = Namespaces::from(vec![Namespace::Mount, Namespace::Pid]);
        assert!(set.contains_name("CLONE_NEWNS"));
        assert!(set.contains_name("pid"));
        assert!(!set.contains_name("net"));
        assert!(!set.contains_name("bogus"));
    }

    #[test]
    fn handle_paths_follow_proc_layout() {
        assert_eq!(
            handle_path(1234, Namespace::Uts),
            PathBuf::from("/proc/1234/ns/uts")
        );
    }

    #[test]
    fn opened_handles_close_on_drop() {
        let pid = std::process::id() as i32;
        let before = open_fd_count();

        let set = Namespaces::from(vec![Namespace::Uts, Namespace::Ipc]);
        let fds = open_namespace_fds(pid, &set).unwrap();
        assert_eq!(fds.len(), 2);
        drop(fds);

        assert_eq!(open_fd_count(), before);
    }

    #[test]
    fn open_failure_closes_already_opened_handles() {
        let before = open_fd_count();

        // No such process, so the open fails.
        let set = Namespaces::from(vec![Namespace::Uts]);
        let err = open_namespace_fds(-1, &set).unwrap_err();
        assert!(matches!(err, ContainerError::Fs(_)));

        assert_eq!(open_fd_count(), before);
    }
}
