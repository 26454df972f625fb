//! Detaching the master from the invoking terminal.
//!
//! [`daemonize`] forks. The parent hands the master lock to the child and
//! returns the child's pid straight away. The child takes the lock over,
//! records itself in the pid file, starts a new session, and runs the given
//! work until it returns; it never returns to the caller.

use crate::error::{QmasterError, Result};
use crate::exit_codes;
use crate::locks::MasterLock;
use crate::pidfile::{remove_pid_file, write_pid_file};
use nix::sys::stat::{Mode, umask};
use nix::unistd::{ForkResult, Pid, chdir, fork, setsid};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// How long the child waits for the parent to hand over the lock.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub pid_file: PathBuf,
    /// Directory the daemon runs in.
    pub work_dir: PathBuf,
    pub transfer_timeout: Duration,
}

impl DaemonSettings {
    pub fn new(pid_file: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            pid_file: pid_file.into(),
            work_dir: work_dir.into(),
            transfer_timeout: TRANSFER_TIMEOUT,
        }
    }
}

/// Fork and run `work` in a detached child holding `lock`.
///
/// Returns the child's pid in the parent. The child exits with status 0 when
/// `work` succeeds and with the error's exit code otherwise.
pub fn daemonize<F>(lock: &mut MasterLock, settings: &DaemonSettings, work: F) -> Result<Pid>
where
    F: FnOnce(&mut MasterLock) -> Result<()>,
{
    // SAFETY: the child only runs single-threaded code from here on and
    // leaves through process::exit.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            lock.transfer_to(child)?;
            Ok(child)
        }
        Ok(ForkResult::Child) => {
            let code = run_detached(lock, settings, work);
            std::process::exit(code)
        }
        Err(e) => Err(QmasterError::Daemon(format!("fork failed: {}", e))),
    }
}

fn run_detached<F>(lock: &mut MasterLock, settings: &DaemonSettings, work: F) -> i32
where
    F: FnOnce(&mut MasterLock) -> Result<()>,
{
    if let Err(e) = lock.assume_ownership(settings.transfer_timeout) {
        lock.disown();
        return startup_failed(&e);
    }

    // From here on the lock is ours and the pid file may exist; both are
    // cleaned up whether detaching or the work fails.
    let code = match detach(settings) {
        Ok(()) => {
            info!(pid = %Pid::this(), "master started");
            match work(lock) {
                Ok(()) => {
                    info!("master exiting");
                    exit_codes::SUCCESS
                }
                Err(e) => {
                    error!(error = %e, "master exiting after failure");
                    e.exit_code()
                }
            }
        }
        Err(e) => startup_failed(&e),
    };

    if let Err(e) = lock.release() {
        error!(error = %e, "failed to release master lock");
    }
    if let Err(e) = remove_pid_file(&settings.pid_file) {
        error!(error = %e, "failed to remove pid file");
    }
    code
}

fn startup_failed(e: &QmasterError) -> i32 {
    error!(error = %e, "failed to start master");
    eprintln!("Error: {}", e);
    exit_codes::DAEMON_FAILURE
}

fn detach(settings: &DaemonSettings) -> Result<()> {
    write_pid_file(&settings.pid_file, Pid::this())?;

    setsid().map_err(|e| QmasterError::Daemon(format!("setsid failed: {}", e)))?;
    chdir(&settings.work_dir).map_err(|e| {
        QmasterError::Daemon(format!(
            "failed to change directory to '{}': {}",
            settings.work_dir.display(),
            e
        ))
    })?;
    umask(Mode::from_bits_truncate(0o007));
    Ok(())
}
