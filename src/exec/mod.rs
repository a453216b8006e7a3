//! Launch and enter sequencers for containerized processes.

mod enter;
mod launch;

pub use enter::enter;
pub use launch::{launch, resolve_rootfs};

use std::ffi::CString;

use nix::unistd::{Gid, Uid};

use crate::container::Command;
use crate::error::{ContainerError, Result};
use crate::kernel::syscall;

/// Environment injected into launched containers when the command does not
/// already set the key.
const DEFAULT_ENV: [(&str, &str); 4] = [
    ("container", "docker"),
    ("TERM", "xterm"),
    ("USER", "root"),
    ("LOGNAME", "root"),
];

/// Prebuilt exec arguments. Materialized in the parent before any clone so
/// the child allocates as little as possible between clone and exec.
#[derive(Debug)]
pub(crate) struct ExecImage {
    program: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
}

impl ExecImage {
    fn new(command: &Command, env: Vec<String>) -> Result<ExecImage> {
        if command.args.is_empty() {
            return Err(ContainerError::Config("empty command".to_string()));
        }
        let argv = to_cstrings(&command.args)?;
        let envp = to_cstrings(&env)?;
        Ok(ExecImage {
            program: argv[0].clone(),
            argv,
            envp,
        })
    }

    /// Replaces the process image; returns the failure if it could not.
    fn exec(&self) -> ContainerError {
        match syscall::exec(&self.program, &self.argv, &self.envp) {
            Ok(never) => match never {},
            Err(e) => ContainerError::Exec(format!("exec {:?}: {e}", self.program)),
        }
    }
}

fn to_cstrings(values: &[String]) -> Result<Vec<CString>> {
    values
        .iter()
        .map(|value| {
            CString::new(value.as_str())
                .map_err(|_| ContainerError::Config(format!("NUL byte in {value:?}")))
        })
        .collect()
}

fn env_with_defaults(env: &[String]) -> Vec<String> {
    let mut merged = env.to_vec();
    for (key, value) in DEFAULT_ENV {
        let already_set = merged
            .iter()
            .any(|entry| entry.split('=').next() == Some(key));
        if !already_set {
            merged.push(format!("{key}={value}"));
        }
    }
    merged
}

/// Unwraps a child-side setup step; a failure takes the one-shot
/// stderr-and-exit path.
fn complete<T>(step: Result<T>) -> T {
    match step {
        Ok(value) => value,
        Err(err) => err.exit_child(),
    }
}

/// Resets the container identity: no supplementary groups, root gid and uid.
fn setup_user() -> Result<()> {
    syscall::setgroups(&[]).map_err(|e| ContainerError::Identity(format!("setgroups: {e}")))?;

    let root_gid = Gid::from_raw(0);
    syscall::setresgid(root_gid, root_gid, root_gid)
        .map_err(|e| ContainerError::Identity(format!("setresgid: {e}")))?;

    let root_uid = Uid::from_raw(0);
    syscall::setresuid(root_uid, root_uid, root_uid)
        .map_err(|e| ContainerError::Identity(format!("setresuid: {e}")))?;
    Ok(())
}
