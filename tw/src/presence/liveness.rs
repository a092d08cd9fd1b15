//! Process existence probe

use tracing::debug;

/// What a probe learned about a pid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// No such process
    Dead,
    /// The probe failed for another reason; never pruned
    Unknown,
}

/// Check whether `pid` names a live process, without signalling it
///
/// A process we lack permission to signal still exists, so `EPERM` counts
/// as alive.
#[cfg(unix)]
pub fn probe(pid: u32) -> Liveness {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // 0 and negative pids address process groups, not a process
    let Ok(raw) = i32::try_from(pid) else {
        return Liveness::Dead;
    };
    if raw <= 0 {
        return Liveness::Dead;
    }

    let result = match kill(Pid::from_raw(raw), None) {
        Ok(()) => Liveness::Alive,
        Err(Errno::ESRCH) => Liveness::Dead,
        Err(Errno::EPERM) => Liveness::Alive,
        Err(e) => {
            debug!(pid, error = %e, "probe: unexpected error");
            Liveness::Unknown
        }
    };
    debug!(pid, ?result, "probe: returning");
    result
}

#[cfg(not(unix))]
pub fn probe(pid: u32) -> Liveness {
    debug!(pid, "probe: unsupported platform");
    Liveness::Unknown
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_is_alive() {
        assert_eq!(probe(std::process::id()), Liveness::Alive);
    }

    #[test]
    fn test_reaped_child_is_dead() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert_eq!(probe(pid), Liveness::Dead);
    }

    #[test]
    fn test_group_pids_are_never_alive() {
        assert_eq!(probe(0), Liveness::Dead);
        assert_eq!(probe(u32::MAX), Liveness::Dead);
    }

    #[test]
    fn test_init_exists_even_if_unprobeable() {
        // pid 1 always exists; as non-root the probe gets EPERM
        assert_eq!(probe(1), Liveness::Alive);
    }
}
