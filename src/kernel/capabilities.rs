//! Capability reduction for container processes.
//!
//! Runs in the child after the hostname is set (which still needs a
//! capability) and before the user switch. The drop narrows the bounding
//! set and clears the ambient set; the process sets are left alone so the
//! identity calls that follow still work, and the exec recomputes the
//! container's capabilities against the reduced bounding set.

use crate::container::Container;
use crate::error::Result;

const PR_CAPBSET_DROP: libc::c_int = 24;
const PR_CAP_AMBIENT: libc::c_int = 47;
const PR_CAP_AMBIENT_CLEAR_ALL: libc::c_ulong = 4;

/// Capabilities removed from the bounding set of every container.
const DROPPED_CAPABILITIES: [(&str, libc::c_ulong); 15] = [
    ("CAP_SETPCAP", 8),
    ("CAP_NET_ADMIN", 12),
    ("CAP_SYS_MODULE", 16),
    ("CAP_SYS_RAWIO", 17),
    ("CAP_SYS_PACCT", 20),
    ("CAP_SYS_ADMIN", 21),
    ("CAP_SYS_NICE", 23),
    ("CAP_SYS_RESOURCE", 24),
    ("CAP_SYS_TIME", 25),
    ("CAP_SYS_TTY_CONFIG", 26),
    ("CAP_AUDIT_WRITE", 29),
    ("CAP_AUDIT_CONTROL", 30),
    ("CAP_MAC_OVERRIDE", 32),
    ("CAP_MAC_ADMIN", 33),
    ("CAP_SYSLOG", 34),
];

/// Drops the blacklisted capabilities for the container's process.
pub fn drop_capabilities(container: &Container) -> Result<()> {
    log::debug!("dropping capabilities for container {}", container.id);
    drop_bounding_set();
    clear_ambient_set();
    Ok(())
}

fn drop_bounding_set() {
    for (name, cap) in DROPPED_CAPABILITIES {
        // SAFETY: prctl(PR_CAPBSET_DROP) takes no pointers; unknown cap
        // numbers on older kernels are rejected with EINVAL.
        let rc = unsafe { libc::prctl(PR_CAPBSET_DROP, cap, 0, 0, 0) };
        if rc != 0 {
            log::warn!(
                "dropping {name} from bounding set failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

fn clear_ambient_set() {
    // SAFETY: prctl(PR_CAP_AMBIENT, PR_CAP_AMBIENT_CLEAR_ALL) takes no
    // pointers. Kernels without ambient capability support return an error.
    let rc = unsafe { libc::prctl(PR_CAP_AMBIENT, PR_CAP_AMBIENT_CLEAR_ALL, 0, 0, 0) };
    if rc != 0 {
        log::warn!(
            "clearing ambient capabilities failed: {}",
            std::io::Error::last_os_error()
        );
    }
}
