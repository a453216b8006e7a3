//! Integration tests for the container execution core.
//!
//! Namespace and mount manipulation need root; those tests skip themselves
//! on unprivileged runners. The rootful tests assemble a scratch root
//! filesystem from read-only bind mounts of the host's toolchain
//! directories, so launched containers exec real binaries and the isolation
//! properties can be observed from inside.

use std::fs;
use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Uid;

use nsbox::{
    create_namespace, enter, launch, resolve_rootfs, wait, Command, Container, ContainerError,
    Namespace, Namespaces,
};

fn command(args: &[&str]) -> Command {
    Command {
        args: args.iter().map(|a| a.to_string()).collect(),
        env: vec![],
    }
}

fn standard_namespaces() -> Namespaces {
    Namespaces::from(vec![
        Namespace::Mount,
        Namespace::Uts,
        Namespace::Ipc,
        Namespace::Pid,
    ])
}

/// Scratch root filesystem: the host's toolchain directories bind-mounted
/// read-only under a temp dir. Usr-merged hosts keep `/bin` and friends as
/// symlinks, which are replicated instead of mounted.
struct ScratchRootfs {
    dir: tempfile::TempDir,
    binds: Vec<PathBuf>,
}

impl ScratchRootfs {
    fn assemble() -> ScratchRootfs {
        let dir = tempfile::tempdir().unwrap();
        let mut binds = Vec::new();

        for name in ["bin", "sbin", "lib", "lib32", "lib64", "usr"] {
            let host = Path::new("/").join(name);
            let Ok(meta) = fs::symlink_metadata(&host) else {
                continue;
            };
            let target = dir.path().join(name);

            if meta.file_type().is_symlink() {
                let link = fs::read_link(&host).unwrap();
                std::os::unix::fs::symlink(link, &target).unwrap();
                continue;
            }

            fs::create_dir(&target).unwrap();
            mount(
                Some(&host),
                &target,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REC,
                None::<&str>,
            )
            .unwrap();
            // Read-only so nothing can write back through the bind; not all
            // kernels accept a recursive read-only remount, so best effort.
            let _ = mount(
                Some(&target),
                &target,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                None::<&str>,
            );
            binds.push(target);
        }

        ScratchRootfs { dir, binds }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn read(&self, name: &str) -> String {
        fs::read_to_string(self.path().join(name)).unwrap()
    }

    fn cleanup(self) {
        for target in self.binds.iter().rev() {
            let _ = umount2(target, MntFlags::MNT_DETACH);
        }
    }
}

#[test]
fn launch_rejects_conflicting_network_configuration() {
    let mut container = Container {
        id: "net-conflict".to_string(),
        root_fs: "/".into(),
        namespaces: Namespaces::from(vec![Namespace::Net]),
        net_ns_fd: 5,
        command: command(&["/bin/true"]),
        ..Container::default()
    };

    let err = launch(&mut container).unwrap_err();
    assert!(matches!(err, ContainerError::Config(_)));
    assert_eq!(container.ns_pid, 0, "no child may have been spawned");
}

#[test]
fn enter_requires_a_running_container() {
    let container = Container {
        ns_pid: 0,
        namespaces: Namespaces::from(vec![Namespace::Mount, Namespace::Pid]),
        ..Container::default()
    };

    let err = enter(&container, &command(&["/bin/ls", "/proc/1"])).unwrap_err();
    assert!(matches!(err, ContainerError::Config(_)));
}

#[test]
fn resolve_rootfs_yields_absolute_symlink_free_paths() {
    let dir = tempfile::tempdir().unwrap();
    let real = dir.path().join("rootfs");
    fs::create_dir(&real).unwrap();
    let link = dir.path().join("alias");
    std::os::unix::fs::symlink(&real, &link).unwrap();

    let container = Container {
        root_fs: link,
        ..Container::default()
    };
    let resolved = resolve_rootfs(&container).unwrap();
    assert!(resolved.is_absolute());
    assert_eq!(resolved, fs::canonicalize(&real).unwrap());
}

#[test]
fn create_namespace_binds_a_persistent_handle() {
    if !Uid::effective().is_root() {
        eprintln!("skipping: requires root");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("uts-ns");
    fs::write(&target, b"").unwrap();

    create_namespace(Namespace::Uts, &target).unwrap();

    let mounts = fs::read_to_string("/proc/mounts").unwrap();
    assert!(
        mounts.contains(target.to_str().unwrap()),
        "bind-mounted handle missing from mount table"
    );

    umount2(&target, MntFlags::MNT_DETACH).unwrap();
}

// The container reports its own view of hostname and PID through files in
// the scratch root, which the host can read back because the root is a
// plain directory on the shared filesystem.
#[test]
fn launch_isolates_hostname_and_pids() {
    if !Uid::effective().is_root() {
        eprintln!("skipping: requires root");
        return;
    }

    let host_hostname = nix::unistd::gethostname().unwrap();
    let scratch = ScratchRootfs::assemble();

    let mut container = Container {
        id: "c1".to_string(),
        root_fs: scratch.path().to_path_buf(),
        namespaces: standard_namespaces(),
        command: command(&[
            "/bin/sh",
            "-c",
            "/bin/hostname > /h 2>/dev/null || /bin/uname -n > /h; echo $$ > /p",
        ]),
        ..Container::default()
    };

    let pid = launch(&mut container).unwrap();
    assert_eq!(container.ns_pid, pid.as_raw());
    assert_eq!(wait::wait_on_pid(pid).unwrap(), 0);

    assert_eq!(scratch.read("h").trim(), "c1", "hostname inside container");
    assert_eq!(scratch.read("p").trim(), "1", "first process must be PID 1");
    assert_eq!(
        nix::unistd::gethostname().unwrap(),
        host_hostname,
        "hostname change must stay inside the uts namespace"
    );

    // The container's pseudo-filesystem mounts must not reach the host
    // mount table; only this test's own toolchain binds may appear.
    let root = scratch.path().to_str().unwrap().to_string();
    let mounts = fs::read_to_string("/proc/mounts").unwrap();
    for inside in ["proc", "dev", "run", "sys"] {
        assert!(
            !mounts.contains(&format!("{root}/{inside}")),
            "container {inside} mount leaked to the host"
        );
    }

    scratch.cleanup();
}

#[test]
fn launch_readonly_root_blocks_writes_but_not_tmpfs() {
    if !Uid::effective().is_root() {
        eprintln!("skipping: requires root");
        return;
    }

    let scratch = ScratchRootfs::assemble();

    let mut container = Container {
        id: "it-ro".to_string(),
        root_fs: scratch.path().to_path_buf(),
        readonly_fs: true,
        namespaces: standard_namespaces(),
        command: command(&[
            "/bin/sh",
            "-c",
            "if echo x > /a 2>/dev/null; then exit 9; fi; echo y > /run/ok || exit 8; exit 0",
        ]),
        ..Container::default()
    };

    let pid = launch(&mut container).unwrap();
    assert_eq!(
        wait::wait_on_pid(pid).unwrap(),
        0,
        "root write must fail, tmpfs write must succeed"
    );
    assert!(
        !scratch.path().join("a").exists(),
        "write through the read-only root reached the backing directory"
    );

    scratch.cleanup();
}

#[test]
fn launch_populates_the_standard_device_tree() {
    if !Uid::effective().is_root() {
        eprintln!("skipping: requires root");
        return;
    }

    let scratch = ScratchRootfs::assemble();

    let probe = "for f in null zero full random urandom tty; do \
                     test -c /dev/$f || exit 2; done; \
                 test -L /dev/ptmx || exit 3; \
                 test -c /dev/console || exit 4; \
                 test -d /dev/pts || exit 5; \
                 test -d /dev/shm || exit 6; \
                 test -d /proc || exit 7; \
                 test -d /sys || exit 7; \
                 test -d /run || exit 7; \
                 exit 0";

    let mut container = Container {
        id: "it-dev".to_string(),
        root_fs: scratch.path().to_path_buf(),
        namespaces: standard_namespaces(),
        command: command(&["/bin/sh", "-c", probe]),
        ..Container::default()
    };

    let pid = launch(&mut container).unwrap();
    assert_eq!(
        wait::wait_on_pid(pid).unwrap(),
        0,
        "a standard device or pseudo-filesystem is missing"
    );

    scratch.cleanup();
}

// Enter joins a container that is still running and must observe the
// container's PID 1, not the host's.
#[test]
fn enter_observes_the_containers_pid_namespace() {
    if !Uid::effective().is_root() {
        eprintln!("skipping: requires root");
        return;
    }

    let scratch = ScratchRootfs::assemble();

    let mut container = Container {
        id: "it-enter".to_string(),
        root_fs: scratch.path().to_path_buf(),
        namespaces: standard_namespaces(),
        command: command(&["/bin/sleep", "30"]),
        ..Container::default()
    };

    let pid = launch(&mut container).unwrap();

    let entered = enter(
        &container,
        &command(&["/bin/sh", "-c", "cat /proc/1/comm > /entered"]),
    )
    .unwrap();
    assert_eq!(wait::wait_on_pid(entered).unwrap(), 0);
    assert_eq!(
        scratch.read("entered").trim(),
        "sleep",
        "/proc/1 inside the container must be the container's first process"
    );

    kill(pid, Signal::SIGKILL).unwrap();
    let _ = wait::wait_on_pid(pid);
    scratch.cleanup();
}

// Drives the child pipeline against an empty rootfs whose command cannot
// exec, so the child must take the diagnostic exit path.
#[test]
fn launch_reports_exec_failure_through_the_child_exit() {
    if !Uid::effective().is_root() {
        eprintln!("skipping: requires root");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("rootfs");
    fs::create_dir(&root).unwrap();

    let mut container = Container {
        id: "it-exec-fail".to_string(),
        root_fs: root,
        namespaces: standard_namespaces(),
        command: command(&["/no/such/program"]),
        ..Container::default()
    };

    let pid = launch(&mut container).unwrap();
    assert_eq!(
        wait::wait_on_pid(pid).unwrap(),
        1,
        "child must die on the pre-exec error path"
    );
}
