//! CLI argument parsing for qmaster.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Qmaster: master supervisor for mailing list queue runners.
///
/// `start` launches a detached master that keeps one process running per
/// queue runner slice. The other commands signal that master through the
/// pid it recorded at startup.
#[derive(Parser, Debug)]
#[command(name = "qmaster")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub options: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Don't restart queue runners when they exit because of an error.
    ///
    /// Use this when debugging a runner that keeps crashing.
    #[arg(short = 'n', long, global = true)]
    pub no_restart: bool,

    /// Run as the invoking user instead of the configured mail user.
    ///
    /// Without this flag the master must be started as root (it then
    /// switches to the configured user) or as the configured user itself.
    #[arg(short = 'u', long, global = true)]
    pub run_as_user: bool,

    /// Remove a stale master lock left behind on this host, then retry.
    ///
    /// Only a lock whose recorded process no longer exists on this host is
    /// ever removed.
    #[arg(short = 's', long, global = true)]
    pub stale_lock_cleanup: bool,

    /// Don't print status messages. Errors are still printed.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Alternate configuration file, also passed on to every queue runner.
    #[arg(short = 'C', long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Available commands for qmaster.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start the master and all queue runners in the background.
    ///
    /// Fails if another master holds the lock.
    Start,

    /// Stop the master and all queue runners.
    ///
    /// Runners are asked to finish gracefully and are not restarted.
    Stop,

    /// Restart every queue runner.
    ///
    /// The master itself keeps running; restarts requested this way do not
    /// count against the restart limit.
    Restart,

    /// Reopen all log files.
    ///
    /// Use this after rotating logs.
    Reopen,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
