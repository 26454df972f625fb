//! Exit code constants for the qmaster CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config)
//! - 2: Master lock could not be acquired
//! - 3: Privilege check failure
//! - 4: Daemonization failure
//! - 5: A queue runner could not be launched

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments or an invalid configuration file.
pub const USER_ERROR: i32 = 1;

/// Lock failure: another master holds the lock, or the lock files are unusable.
pub const LOCK_FAILURE: i32 = 2;

/// Privilege failure: the process is running under the wrong identity.
pub const PRIVILEGE_FAILURE: i32 = 3;

/// Daemonization failure: fork, session setup or pid file errors.
pub const DAEMON_FAILURE: i32 = 4;

/// Runner failure: the queue runner program could not be executed.
pub const RUNNER_FAILURE: i32 = 5;
