//! Command implementations for qmaster.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations. `start` lives in its own module; the other commands all
//! send one control message to the running master.
//!
//! Every command first makes sure it runs as the configured mail user, so
//! that control commands can read the pid file and signal the master.

mod control;
mod start;

use crate::cli::{Cli, Command, GlobalOptions};
use crate::config::Config;
use crate::error::Result;
use crate::privs::check_privileges;
use crate::signals::ControlMessage;

/// Dispatch a command to its implementation.
pub fn dispatch(cli: Cli) -> Result<()> {
    let config = Config::resolve(cli.options.config.as_deref())?;
    ensure_identity(&cli.options, &config)?;

    match cli.command {
        Command::Start => start::cmd_start(&cli.options, &config),
        Command::Stop => control::cmd_control(&cli.options, &config, ControlMessage::Stop),
        Command::Restart => control::cmd_control(&cli.options, &config, ControlMessage::Restart),
        Command::Reopen => control::cmd_control(&cli.options, &config, ControlMessage::Reopen),
    }
}

/// Switch to the configured user, or warn when `--run-as-user` skips that.
fn ensure_identity(options: &GlobalOptions, config: &Config) -> Result<()> {
    if options.run_as_user {
        say(options, "Warning! You may encounter permission problems.");
        Ok(())
    } else {
        check_privileges(&config.user, &config.group)
    }
}

/// Print a status line unless `--quiet` was given.
fn say(options: &GlobalOptions, message: &str) {
    if !options.quiet {
        println!("{}", message);
    }
}
