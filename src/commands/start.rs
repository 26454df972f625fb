//! Implementation of the `qmaster start` command.
//!
//! # What `qmaster start` does
//!
//! 1. Opens the log file (the dispatcher has already switched users)
//! 2. Acquires the master lock (`--stale-lock-cleanup` clears a stale one)
//! 3. Forks a detached master and hands it the lock
//! 4. The master launches every queue runner slice and supervises them

use super::say;
use crate::cli::GlobalOptions;
use crate::config::Config;
use crate::daemon::{DaemonSettings, daemonize};
use crate::error::{QmasterError, Result};
use crate::locks::{MasterLock, acquire_master_lock};
use crate::logging::{self, LogFile};
use crate::runner::{Launcher, RunnerSpec};
use crate::supervisor::{OsHost, RestartPolicy, Supervisor};
use std::path::{Path, PathBuf};
use tracing::info;

/// Execute the `qmaster start` command.
pub fn cmd_start(options: &GlobalOptions, config: &Config) -> Result<()> {
    let logs = logging::init(&config.log_path());

    // Runners start in the prefix directory, so they need an absolute path.
    let config_path = options.config.as_deref().map(absolute).transpose()?;
    let launcher = Launcher::from_config(config, config_path.as_deref())?;

    let mut lock = acquire_master_lock(
        &config.lock_path(),
        config.lock_lifetime(),
        config.lock_timeout(),
        options.stale_lock_cleanup,
    )?;

    say(options, "Starting the master queue runner.");
    let settings = DaemonSettings::new(config.pid_path(), &config.prefix);
    let restart = !options.no_restart;
    let pid = daemonize(&mut lock, &settings, |lock| {
        run_master(lock, config, launcher, restart, logs)
    })?;

    info!(pid = %pid, "master queue runner started");
    Ok(())
}

/// Body of the detached master.
fn run_master(
    lock: &mut MasterLock,
    config: &Config,
    launcher: Launcher,
    restart: bool,
    logs: Option<LogFile>,
) -> Result<()> {
    let host = OsHost::new(launcher)?;
    let roster = RunnerSpec::expand(&config.runners);
    let policy = RestartPolicy::new(restart, config.max_restarts);

    let mut supervisor =
        Supervisor::new(host, roster, policy, config.lock_refresh()).with_lease(lock);
    if let Some(logs) = logs {
        supervisor = supervisor.with_log_file(logs);
    }
    supervisor.run()
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| {
        QmasterError::Config(format!(
            "failed to resolve config path '{}': {}",
            path.display(),
            e
        ))
    })
}
