//! The operating system seam of the supervisor.

use crate::error::{QmasterError, Result};
use crate::runner::{Launcher, RunnerSpec};
use crate::signals::{self, ControlChannel, ControlMessage, Delivery, Wakeup};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::time::Duration;

/// Something the supervisor must react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A runner terminated, by exiting or by a signal.
    Exited { pid: Pid, status: WaitStatus },
    /// An operator or the refresh timer sent a control message.
    Control(ControlMessage),
    /// The master has no children left to wait for.
    NoChildren,
}

/// Process primitives the supervisor is built on.
pub trait ProcessHost {
    /// Start a runner and return its pid.
    fn launch(&mut self, spec: &RunnerSpec) -> Result<Pid>;

    /// Send `signal` to one runner.
    fn signal(&mut self, pid: Pid, signal: Signal) -> Result<Delivery>;

    /// Block until the next event.
    fn next_event(&mut self) -> Result<Event>;

    /// Schedule a `RefreshLease` event `period` from now.
    fn arm_refresh_timer(&mut self, period: Duration);
}

/// [`ProcessHost`] backed by real child processes and signals.
#[derive(Debug)]
pub struct OsHost {
    launcher: Launcher,
    channel: ControlChannel,
}

impl OsHost {
    /// Takes over signal delivery for the calling thread; see
    /// [`ControlChannel::install`].
    pub fn new(launcher: Launcher) -> Result<Self> {
        Ok(Self {
            launcher,
            channel: ControlChannel::install()?,
        })
    }

    fn reap(&self) -> Result<Option<Event>> {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => return Ok(None),
                Ok(status @ (WaitStatus::Exited(pid, _) | WaitStatus::Signaled(pid, _, _))) => {
                    return Ok(Some(Event::Exited { pid, status }));
                }
                Ok(_) => continue,
                Err(Errno::ECHILD) => return Ok(Some(Event::NoChildren)),
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    return Err(QmasterError::Signal(format!(
                        "failed to wait for queue runners: {}",
                        e
                    )));
                }
            }
        }
    }
}

impl ProcessHost for OsHost {
    fn launch(&mut self, spec: &RunnerSpec) -> Result<Pid> {
        self.launcher.launch(spec)
    }

    fn signal(&mut self, pid: Pid, signal: Signal) -> Result<Delivery> {
        signals::send(pid, signal)
    }

    fn next_event(&mut self) -> Result<Event> {
        loop {
            if let Some(event) = self.reap()? {
                return Ok(event);
            }
            // SIGCHLD stays pending while blocked, so an exit between the
            // reap above and this wait still wakes us up.
            match self.channel.wait()? {
                Wakeup::ChildStateChanged => continue,
                Wakeup::Control(msg) => return Ok(Event::Control(msg)),
            }
        }
    }

    fn arm_refresh_timer(&mut self, period: Duration) {
        self.channel.arm_refresh_timer(period);
    }
}
