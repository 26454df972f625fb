//! Exit classification and the restart decision.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use std::fmt;

/// Exit status a runner uses after honouring a graceful stop.
pub const EXIT_STOPPED: i32 = 15;

/// Exit status a runner uses after honouring a restart request.
pub const EXIT_RESTART: i32 = 2;

/// Why a runner went away.
///
/// The three cases are mutually exclusive; a signal and an exit status that
/// happen to share a number are never confused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Killed by `SIGTERM` or exited with [`EXIT_STOPPED`].
    GracefulStop,
    /// Killed by `SIGINT` or exited with [`EXIT_RESTART`].
    RestartRequested,
    /// Anything else: a crash, a stray signal, an unexpected status.
    Failed,
}

impl ExitReason {
    pub fn classify(status: &WaitStatus) -> Self {
        match *status {
            WaitStatus::Signaled(_, Signal::SIGTERM, _) => ExitReason::GracefulStop,
            WaitStatus::Signaled(_, Signal::SIGINT, _) => ExitReason::RestartRequested,
            WaitStatus::Exited(_, EXIT_STOPPED) => ExitReason::GracefulStop,
            WaitStatus::Exited(_, EXIT_RESTART) => ExitReason::RestartRequested,
            _ => ExitReason::Failed,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitReason::GracefulStop => "graceful stop",
            ExitReason::RestartRequested => "restart requested",
            ExitReason::Failed => "failure",
        };
        f.write_str(name)
    }
}

/// What to do with a runner identity after one of its processes exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Launch it again, carrying the updated restart count.
    Restart { restarts: u32 },
    /// Restarts are disabled or the runner was asked to stop.
    Halt,
    /// The restart cap was exceeded; never launch this identity again.
    Retire { restarts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub enabled: bool,
    pub max_restarts: u32,
}

impl RestartPolicy {
    pub fn new(enabled: bool, max_restarts: u32) -> Self {
        Self {
            enabled,
            max_restarts,
        }
    }

    /// Decide the fate of a runner that had been restarted `restarts` times.
    pub fn decide(&self, reason: ExitReason, restarts: u32) -> Decision {
        if !self.enabled || reason == ExitReason::GracefulStop {
            return Decision::Halt;
        }

        let restarts = match reason {
            ExitReason::RestartRequested => restarts,
            _ => restarts.saturating_add(1),
        };

        if restarts > self.max_restarts {
            Decision::Retire { restarts }
        } else {
            Decision::Restart { restarts }
        }
    }
}
