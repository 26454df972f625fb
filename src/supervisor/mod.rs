//! The master's watcher loop.
//!
//! [`Supervisor`] launches one process per runner slice, waits for them to
//! exit, and restarts them according to [`RestartPolicy`]. Control messages
//! are delivered through the same [`ProcessHost::next_event`] call as exits,
//! so all state changes happen on one thread, in the order they were
//! observed.
//!
//! Per runner identity the lifecycle is
//! `starting -> running -> exited -> (restarting -> starting) | retired`.
//!
//! # Shutdown
//!
//! The loop ends when a `Stop` message arrives, when no children remain, or
//! when a runner cannot be launched. In every case the supervisor then drains:
//! it sends `SIGTERM` to each tracked runner and keeps reaping, without
//! restarting anything, until the host reports that no children are left.

mod host;
mod policy;
mod table;


pub use host::{Event, OsHost, ProcessHost};
pub use policy::{Decision, EXIT_RESTART, EXIT_STOPPED, ExitReason, RestartPolicy};
pub use table::{ChildInfo, ChildTable};

use crate::error::Result;
use crate::locks::Lease;
use crate::logging::LogFile;
use crate::runner::RunnerSpec;
use crate::signals::{ControlMessage, Delivery};
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct Supervisor<'a, H: ProcessHost> {
    host: H,
    roster: Vec<RunnerSpec>,
    policy: RestartPolicy,
    children: ChildTable,
    retired: Vec<RunnerSpec>,
    lease: Option<&'a mut dyn Lease>,
    logs: Option<LogFile>,
    refresh_period: Duration,
}

impl<'a, H: ProcessHost> Supervisor<'a, H> {
    pub fn new(
        host: H,
        roster: Vec<RunnerSpec>,
        policy: RestartPolicy,
        refresh_period: Duration,
    ) -> Self {
        Self {
            host,
            roster,
            policy,
            children: ChildTable::new(),
            retired: Vec::new(),
            lease: None,
            logs: None,
            refresh_period,
        }
    }

    /// Lease renewed on every `RefreshLease` message.
    pub fn with_lease(mut self, lease: &'a mut dyn Lease) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Log file reopened on every `Reopen` message.
    pub fn with_log_file(mut self, logs: LogFile) -> Self {
        self.logs = Some(logs);
        self
    }

    #[cfg(test)]
    pub fn host(&self) -> &H {
        &self.host
    }

    #[cfg(test)]
    pub fn children(&self) -> &ChildTable {
        &self.children
    }

    /// Runner identities that exceeded the restart cap.
    #[cfg(test)]
    pub fn retired(&self) -> &[RunnerSpec] {
        &self.retired
    }

    /// Launch the roster and supervise it until shutdown.
    ///
    /// Returns only once every runner has been reaped. A launch failure is
    /// returned after the runners already started have been drained.
    pub fn run(&mut self) -> Result<()> {
        self.host.arm_refresh_timer(self.refresh_period);

        let outcome = self.start_all().and_then(|()| self.watch());
        if let Err(e) = &outcome {
            error!(error = %e, "supervision failed; stopping queue runners");
        }

        let drained = self.drain();
        outcome.and(drained)
    }

    fn start_all(&mut self) -> Result<()> {
        for spec in self.roster.clone() {
            self.launch_child(spec, 0)?;
        }
        info!(runners = self.children.len(), "queue runners started");
        Ok(())
    }

    fn launch_child(&mut self, spec: RunnerSpec, restarts: u32) -> Result<()> {
        let pid = self.host.launch(&spec)?;
        self.children.insert(pid, ChildInfo { spec, restarts });
        Ok(())
    }

    fn watch(&mut self) -> Result<()> {
        loop {
            match self.host.next_event()? {
                Event::NoChildren => {
                    info!("no queue runners left to supervise");
                    return Ok(());
                }
                Event::Exited { pid, status } => self.on_exit(pid, status)?,
                Event::Control(ControlMessage::Stop) => {
                    info!("stop requested");
                    return Ok(());
                }
                Event::Control(msg) => self.on_control(msg)?,
            }
        }
    }

    fn on_exit(&mut self, pid: Pid, status: WaitStatus) -> Result<()> {
        let Some(info) = self.children.remove(pid) else {
            debug!(pid = %pid, ?status, "reaped untracked child");
            return Ok(());
        };

        let reason = ExitReason::classify(&status);
        let decision = self.policy.decide(reason, info.restarts);
        log_exit(
            pid,
            &status,
            &info.spec,
            reason,
            matches!(decision, Decision::Restart { .. }),
        );

        match decision {
            Decision::Restart { restarts } => self.launch_child(info.spec, restarts),
            Decision::Halt => Ok(()),
            Decision::Retire { restarts } => {
                warn!(
                    runner = %info.spec,
                    restarts,
                    max_restarts = self.policy.max_restarts,
                    "queue runner restarted too many times; retiring it"
                );
                self.retired.push(info.spec);
                Ok(())
            }
        }
    }

    fn on_control(&mut self, msg: ControlMessage) -> Result<()> {
        info!(message = %msg, "handling control message");
        match msg {
            ControlMessage::Reopen => self.reopen_logs(),
            ControlMessage::RefreshLease => self.refresh_lease(),
            ControlMessage::Stop | ControlMessage::Restart => {}
        }

        if let Some(signal) = msg.forwarded_signal() {
            self.broadcast(signal)?;
        }
        Ok(())
    }

    fn reopen_logs(&mut self) {
        if let Some(logs) = &self.logs
            && let Err(e) = logs.reopen()
        {
            error!(error = %e, "failed to reopen log file");
        }
    }

    fn refresh_lease(&mut self) {
        if let Some(lease) = self.lease.as_deref_mut() {
            match lease.refresh() {
                Ok(()) => debug!("master lock lease refreshed"),
                Err(e) => error!(error = %e, "failed to refresh master lock lease"),
            }
        }
        self.host.arm_refresh_timer(self.refresh_period);
    }

    /// Send `signal` to every tracked runner; returns the pids that were gone.
    fn broadcast(&mut self, signal: Signal) -> Result<Vec<Pid>> {
        let mut gone = Vec::new();
        for pid in self.children.pids() {
            if self.host.signal(pid, signal)? == Delivery::NoSuchProcess {
                warn!(pid = %pid, %signal, "ESRCH on pid");
                gone.push(pid);
            }
        }
        Ok(gone)
    }

    fn terminate_all(&mut self) -> Result<()> {
        for pid in self.broadcast(Signal::SIGTERM)? {
            self.children.remove(pid);
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        if !self.children.is_empty() {
            info!(runners = self.children.len(), "stopping queue runners");
        }
        self.terminate_all()?;

        loop {
            match self.host.next_event()? {
                Event::NoChildren => break,
                Event::Exited { pid, status } => {
                    if let Some(info) = self.children.remove(pid) {
                        let reason = ExitReason::classify(&status);
                        log_exit(pid, &status, &info.spec, reason, false);
                    }
                }
                Event::Control(ControlMessage::Stop) => self.terminate_all()?,
                Event::Control(ControlMessage::Restart) => {
                    info!("ignoring restart request while stopping");
                }
                Event::Control(msg) => self.on_control(msg)?,
            }
        }

        info!("all queue runners have exited");
        Ok(())
    }
}

fn log_exit(
    pid: Pid,
    status: &WaitStatus,
    spec: &RunnerSpec,
    reason: ExitReason,
    restarting: bool,
) {
    let (signal, code) = match *status {
        WaitStatus::Signaled(_, signal, _) => (Some(signal), None),
        WaitStatus::Exited(_, code) => (None, Some(code)),
        _ => (None, None),
    };

    info!(
        pid = %pid,
        ?signal,
        ?code,
        runner = %spec.class,
        slice = %format!("{}/{}", spec.slice + 1, spec.count),
        reason = %reason,
        restarting,
        "queue runner exited"
    );
}
