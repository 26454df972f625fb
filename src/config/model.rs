//! Config struct definition and default implementation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One class of queue runner and how many slices of it to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerClass {
    /// Runner class name, passed to the runner program verbatim.
    pub name: String,

    /// Number of slices (processes) the class's queue is partitioned into.
    #[serde(default = "default_count")]
    pub count: u32,
}

impl RunnerClass {
    pub fn new(name: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// Configuration for the master supervisor.
///
/// Relative paths are resolved against `prefix`.
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Installation layout
    // =========================================================================
    /// Installation root; the daemon changes its working directory here.
    #[serde(default = "default_prefix")]
    pub prefix: PathBuf,

    /// Master lock file.
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,

    /// File recording the running master's pid.
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Log file for the master and its control messages.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    // =========================================================================
    // Queue runners
    // =========================================================================
    /// Command line of the queue runner program (shell-words syntax).
    #[serde(default = "default_runner_command")]
    pub runner_command: String,

    /// Runner classes to start, in order.
    #[serde(default = "default_runners")]
    pub runners: Vec<RunnerClass>,

    /// Restarts allowed per runner slice before it is retired.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    // =========================================================================
    // Identity
    // =========================================================================
    /// User the master must run as.
    #[serde(default = "default_user")]
    pub user: String,

    /// Group the master must run as.
    #[serde(default = "default_group")]
    pub group: String,

    // =========================================================================
    // Lock settings
    // =========================================================================
    /// Seconds a claim stays valid without a refresh.
    #[serde(default = "default_lock_lifetime_secs")]
    pub lock_lifetime_secs: u64,

    /// Seconds between lease refreshes while the master runs.
    #[serde(default = "default_lock_refresh_secs")]
    pub lock_refresh_secs: u64,

    /// Milliseconds to wait for the lock at startup.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

// Default value functions for serde
fn default_count() -> u32 {
    1
}
fn default_prefix() -> PathBuf {
    PathBuf::from("/var/lib/qmaster")
}
fn default_lock_file() -> PathBuf {
    PathBuf::from("locks/master-qrunner")
}
fn default_pid_file() -> PathBuf {
    PathBuf::from("data/master-qrunner.pid")
}
fn default_log_file() -> PathBuf {
    PathBuf::from("logs/qrunner")
}
fn default_runner_command() -> String {
    "bin/qrunner -s".to_string()
}
pub(super) fn default_runners() -> Vec<RunnerClass> {
    [
        "ArchRunner",
        "BounceRunner",
        "CommandRunner",
        "IncomingRunner",
        "NewsRunner",
        "OutgoingRunner",
        "VirginRunner",
        "RetryRunner",
    ]
    .into_iter()
    .map(|name| RunnerClass::new(name, 1))
    .collect()
}
fn default_max_restarts() -> u32 {
    10
}
fn default_user() -> String {
    "mailman".to_string()
}
fn default_group() -> String {
    "mailman".to_string()
}
fn default_lock_lifetime_secs() -> u64 {
    // One day plus six hours of padding over the refresh interval.
    30 * 60 * 60
}
fn default_lock_refresh_secs() -> u64 {
    24 * 60 * 60
}
fn default_lock_timeout_ms() -> u64 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            lock_file: default_lock_file(),
            pid_file: default_pid_file(),
            log_file: default_log_file(),
            runner_command: default_runner_command(),
            runners: default_runners(),
            max_restarts: default_max_restarts(),
            user: default_user(),
            group: default_group(),
            lock_lifetime_secs: default_lock_lifetime_secs(),
            lock_refresh_secs: default_lock_refresh_secs(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}
