//! Error types for the qmaster CLI and daemon.
//!
//! Uses thiserror for derive macros and provides operator-actionable messages.

use crate::exit_codes;
use crate::locks::Conflict;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for qmaster operations.
///
/// Each variant maps to a specific process exit code.
#[derive(Error, Debug)]
pub enum QmasterError {
    /// The configuration file is missing, malformed, or fails validation.
    #[error("{0}")]
    Config(String),

    /// The master lock could not be claimed before the timeout elapsed.
    #[error("timed out acquiring lock '{}'", path.display())]
    LockTimeout { path: PathBuf },

    /// Another claim holds the master lock; the message says what to do about it.
    #[error("{}", conflict.diagnosis(path))]
    LockConflict { path: PathBuf, conflict: Conflict },

    /// Lock files could not be read, linked, or removed.
    #[error("Lock operation failed: {0}")]
    Lock(String),

    /// The process is not running as the configured user and group.
    #[error("{0}")]
    Privilege(String),

    /// Forking, detaching, or writing the pid file failed.
    #[error("Daemonization failed: {0}")]
    Daemon(String),

    /// A queue runner could not be started.
    #[error("failed to launch queue runner {runner}: {reason}")]
    Launch { runner: String, reason: String },

    /// A control signal could not be delivered or the signal mask set up.
    #[error("Signal delivery failed: {0}")]
    Signal(String),
}

impl QmasterError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            QmasterError::Config(_) => exit_codes::USER_ERROR,
            QmasterError::LockTimeout { .. }
            | QmasterError::LockConflict { .. }
            | QmasterError::Lock(_) => exit_codes::LOCK_FAILURE,
            QmasterError::Privilege(_) => exit_codes::PRIVILEGE_FAILURE,
            QmasterError::Daemon(_) | QmasterError::Signal(_) => exit_codes::DAEMON_FAILURE,
            QmasterError::Launch { .. } => exit_codes::RUNNER_FAILURE,
        }
    }
}

/// Result type alias for qmaster operations.
pub type Result<T> = std::result::Result<T, QmasterError>;
