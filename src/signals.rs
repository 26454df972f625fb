//! Control protocol between operators, the master, and its queue runners.
//!
//! Operators talk to the master with four POSIX signals, each mapped to one
//! [`ControlMessage`]:
//!
//! | signal    | message        | forwarded to runners |
//! |-----------|----------------|----------------------|
//! | `SIGTERM` | `Stop`         | `SIGTERM`            |
//! | `SIGINT`  | `Restart`      | `SIGINT`             |
//! | `SIGHUP`  | `Reopen`       | `SIGHUP`             |
//! | `SIGALRM` | `RefreshLease` | nothing              |
//!
//! The master never runs work inside an asynchronous handler. Instead the
//! control signals and `SIGCHLD` are blocked and collected synchronously with
//! `sigwait` by [`ControlChannel`], so every message is handled on the main
//! loop, in order, with exclusive access to the supervisor state.

use crate::error::{QmasterError, Result};
use crate::pidfile::{read_pid_file, remove_pid_file};
use nix::errno::Errno;
use nix::sys::signal::{SigSet, Signal, kill};
use nix::unistd::{Pid, alarm};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// The closed set of control messages the master understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Stop every runner and exit; stopped runners are not restarted.
    Stop,
    /// Make every runner exit and restart it without counting a failure.
    Restart,
    /// Reopen log files in the master and in every runner.
    Reopen,
    /// Renew the master lock's lease and re-arm the refresh timer.
    RefreshLease,
}

impl ControlMessage {
    pub const ALL: [ControlMessage; 4] = [
        ControlMessage::Stop,
        ControlMessage::Restart,
        ControlMessage::Reopen,
        ControlMessage::RefreshLease,
    ];

    /// Signal that carries this message to the master.
    pub fn signal(self) -> Signal {
        match self {
            ControlMessage::Stop => Signal::SIGTERM,
            ControlMessage::Restart => Signal::SIGINT,
            ControlMessage::Reopen => Signal::SIGHUP,
            ControlMessage::RefreshLease => Signal::SIGALRM,
        }
    }

    /// Decode a signal received by the master.
    pub fn from_signal(signal: Signal) -> Option<Self> {
        Self::ALL.into_iter().find(|msg| msg.signal() == signal)
    }

    /// Signal the master relays to each runner on receipt, if any.
    pub fn forwarded_signal(self) -> Option<Signal> {
        match self {
            ControlMessage::Stop => Some(Signal::SIGTERM),
            ControlMessage::Restart => Some(Signal::SIGINT),
            ControlMessage::Reopen => Some(Signal::SIGHUP),
            ControlMessage::RefreshLease => None,
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlMessage::Stop => "stop",
            ControlMessage::Restart => "restart",
            ControlMessage::Reopen => "reopen",
            ControlMessage::RefreshLease => "refresh-lease",
        };
        f.write_str(name)
    }
}

/// What woke the master up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// `SIGCHLD`: at least one runner changed state.
    ChildStateChanged,
    /// An operator or the refresh timer sent a control message.
    Control(ControlMessage),
}

/// Synchronous receiver for control signals and child notifications.
///
/// Creating the channel blocks `SIGCHLD` and the four control signals in the
/// calling thread, so they stay pending until [`ControlChannel::wait`]
/// collects them. The master is single threaded, so this covers the process.
/// Runners spawned through `std::process::Command` start with an empty mask.
#[derive(Debug)]
pub struct ControlChannel {
    mask: SigSet,
}

impl ControlChannel {
    pub fn install() -> Result<Self> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGCHLD);
        for msg in ControlMessage::ALL {
            mask.add(msg.signal());
        }

        mask.thread_block().map_err(|e| {
            QmasterError::Signal(format!("failed to block control signals: {}", e))
        })?;

        Ok(Self { mask })
    }

    /// Block until a control signal or `SIGCHLD` arrives.
    pub fn wait(&mut self) -> Result<Wakeup> {
        loop {
            match self.mask.wait() {
                Ok(Signal::SIGCHLD) => return Ok(Wakeup::ChildStateChanged),
                Ok(signal) => match ControlMessage::from_signal(signal) {
                    Some(msg) => {
                        debug!(%signal, message = %msg, "received control signal");
                        return Ok(Wakeup::Control(msg));
                    }
                    None => continue,
                },
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    return Err(QmasterError::Signal(format!(
                        "failed to wait for signals: {}",
                        e
                    )));
                }
            }
        }
    }

    /// Schedule a `RefreshLease` message `period` from now, replacing any
    /// earlier schedule.
    pub fn arm_refresh_timer(&self, period: Duration) {
        let secs = u32::try_from(period.as_secs().max(1)).unwrap_or(u32::MAX);
        alarm::set(secs);
    }
}

/// Result of delivering a signal to one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The target had already exited.
    NoSuchProcess,
}

/// Send `signal` to `pid`, treating an already-exited target as benign.
pub fn send(pid: Pid, signal: Signal) -> Result<Delivery> {
    match kill(pid, signal) {
        Ok(()) => Ok(Delivery::Delivered),
        Err(Errno::ESRCH) => Ok(Delivery::NoSuchProcess),
        Err(e) => Err(QmasterError::Signal(format!(
            "failed to send {} to pid {}: {}",
            signal, pid, e
        ))),
    }
}

/// Outcome of sending a control message to the running master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterSignal {
    /// The master received the message.
    Delivered(Pid),
    /// The pid file is missing or unreadable; the master is probably not running.
    PidUnreadable(String),
    /// The recorded pid no longer exists; the stale pid file was removed.
    StalePidRemoved(Pid),
}

/// Send a control message to the master recorded in `pid_file`.
pub fn signal_master(pid_file: &Path, msg: ControlMessage) -> Result<MasterSignal> {
    let pid = match read_pid_file(pid_file) {
        Ok(pid) => pid,
        Err(e) => return Ok(MasterSignal::PidUnreadable(e.to_string())),
    };

    match send(pid, msg.signal())? {
        Delivery::Delivered => Ok(MasterSignal::Delivered(pid)),
        Delivery::NoSuchProcess => {
            remove_pid_file(pid_file)?;
            Ok(MasterSignal::StalePidRemoved(pid))
        }
    }
}
