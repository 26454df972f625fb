//! Implementation of `qmaster stop`, `qmaster restart`, and `qmaster reopen`.
//!
//! Each sends one control signal to the pid recorded in the pid file. A
//! master that is not running is reported, not treated as a failure.

use super::say;
use crate::cli::GlobalOptions;
use crate::config::Config;
use crate::error::Result;
use crate::logging;
use crate::signals::{ControlMessage, MasterSignal, signal_master};
use std::path::Path;
use tracing::info;

/// Execute `stop`, `restart` or `reopen`.
pub fn cmd_control(options: &GlobalOptions, config: &Config, msg: ControlMessage) -> Result<()> {
    logging::init(&config.log_path());
    say(options, announcement(msg));

    let pid_file = config.pid_path();
    let outcome = signal_master(&pid_file, msg)?;
    for line in report(&pid_file, &outcome) {
        eprintln!("{}", line);
    }

    if let MasterSignal::Delivered(pid) = outcome {
        info!(pid = %pid, message = %msg, "sent control message to master");
    }
    Ok(())
}

fn announcement(msg: ControlMessage) -> &'static str {
    match msg {
        ControlMessage::Stop => "Shutting down the master queue runner.",
        ControlMessage::Restart => "Restarting the master queue runner.",
        ControlMessage::Reopen => "Re-opening all log files.",
        ControlMessage::RefreshLease => "Refreshing the master lock.",
    }
}

/// Diagnostics for a message that did not reach a running master.
fn report(pid_file: &Path, outcome: &MasterSignal) -> Vec<String> {
    match outcome {
        MasterSignal::Delivered(_) => Vec::new(),
        MasterSignal::PidUnreadable(_) => vec![
            format!("PID unreadable in: {}", pid_file.display()),
            "Is the master queue runner even running?".to_string(),
        ],
        MasterSignal::StalePidRemoved(pid) => vec![
            format!("No child with pid: {}", pid),
            "Stale pid file removed.".to_string(),
        ],
    }
}
