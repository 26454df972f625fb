//! Classification of a competing claim on the master lock.
//!
//! Liveness can only be checked on the local host, by sending signal 0 to the
//! recorded pid. A claim made from another host is never considered dead.

use super::claim::{Claim, local_hostname};
use crate::error::{QmasterError, Result};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::path::Path;

/// Why the master lock could not be acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// The owner runs on this host and is still alive.
    SameHostAlive { pid: Pid },

    /// The owner was on this host but the process is gone.
    SameHostStale { pid: Pid },

    /// The owner is on another host; its liveness cannot be verified.
    OtherHost { host: String },
}

impl Conflict {
    /// Whether a forced takeover of this claim is safe.
    pub fn is_stale(&self) -> bool {
        matches!(self, Conflict::SameHostStale { .. })
    }

    /// Operator-facing explanation of the conflict.
    pub fn diagnosis(&self, lock_file: &Path) -> String {
        match self {
            Conflict::SameHostAlive { pid } => format!(
                "The master queue runner lock could not be acquired because it appears \
                 as if another master queue runner is already running (pid {}).",
                pid
            ),
            Conflict::SameHostStale { pid } => format!(
                "The master queue runner lock could not be acquired. It appears as though \
                 there is a stale master queue runner lock (pid {} no longer exists). \
                 Try re-running qmaster with the -s flag.",
                pid
            ),
            Conflict::OtherHost { host } => format!(
                "The master queue runner lock could not be acquired, because it appears \
                 as if some process on some other host may have acquired it. We can't \
                 test for stale locks across host boundaries, so you'll have to do this \
                 manually.\n\nLock file: {}\nLock host: {}",
                lock_file.display(),
                host
            ),
        }
    }
}

/// Classify a claim against the local host using a real signal-0 probe.
pub fn classify(claim: &Claim) -> Result<Conflict> {
    classify_with(claim, &local_hostname(), process_exists)
}

/// Classify a claim with an explicit local host name and liveness probe.
///
/// The probe is never called for claims made from another host.
pub fn classify_with<F>(claim: &Claim, local_host: &str, probe: F) -> Result<Conflict>
where
    F: FnOnce(Pid) -> Result<bool>,
{
    if claim.host != local_host {
        return Ok(Conflict::OtherHost {
            host: claim.host.clone(),
        });
    }

    if probe(claim.pid)? {
        Ok(Conflict::SameHostAlive { pid: claim.pid })
    } else {
        Ok(Conflict::SameHostStale { pid: claim.pid })
    }
}

/// Probe whether a local process exists by sending it signal 0.
///
/// `EPERM` means the process exists but belongs to someone else.
pub fn process_exists(pid: Pid) -> Result<bool> {
    match kill(pid, None::<Signal>) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(QmasterError::Lock(format!(
            "failed to probe pid {}: {}",
            pid, e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::process::Command;

    fn claim(host: &str, pid: i32) -> Claim {
        Claim::new("tok", host, Pid::from_raw(pid))
    }

    #[test]
    fn other_host_never_probes() {
        let probed = Cell::new(false);
        let conflict = classify_with(&claim("far.example.com", 12), "near", |_| {
            probed.set(true);
            Ok(true)
        })
        .unwrap();

        assert_eq!(
            conflict,
            Conflict::OtherHost {
                host: "far.example.com".to_string()
            }
        );
        assert!(!probed.get());
        assert!(!conflict.is_stale());
    }

    #[test]
    fn same_host_alive_and_stale() {
        let alive = classify_with(&claim("near", 12), "near", |_| Ok(true)).unwrap();
        assert_eq!(
            alive,
            Conflict::SameHostAlive {
                pid: Pid::from_raw(12)
            }
        );

        let stale = classify_with(&claim("near", 12), "near", |_| Ok(false)).unwrap();
        assert!(stale.is_stale());
    }

    #[test]
    fn probe_errors_propagate() {
        let result = classify_with(&claim("near", 12), "near", |_| {
            Err(QmasterError::Lock("probe failed".into()))
        });
        assert!(result.is_err());
    }

    #[test]
    fn process_exists_for_self() {
        assert!(process_exists(Pid::this()).unwrap());
    }

    #[test]
    fn process_exists_false_for_reaped_child() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        child.wait().unwrap();

        assert!(!process_exists(pid).unwrap());
    }

    #[test]
    fn classify_real_probe_detects_stale_local_claim() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();

        let conflict = classify(&Claim::local("tok", Pid::from_raw(pid))).unwrap();
        assert!(conflict.is_stale());
    }

    #[test]
    fn diagnosis_names_the_remedy() {
        let lock = Path::new("/tmp/master-qrunner");
        let alive = Conflict::SameHostAlive {
            pid: Pid::from_raw(9),
        };
        assert!(alive.diagnosis(lock).contains("already running"));

        let remote = Conflict::OtherHost {
            host: "mx2".to_string(),
        };
        let text = remote.diagnosis(lock);
        assert!(text.contains("Lock host: mx2"));
        assert!(text.contains("/tmp/master-qrunner"));
    }
}
