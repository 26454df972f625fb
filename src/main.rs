//! Qmaster: master supervisor for mailing list queue runners.
//!
//! This is the main entry point for the `qmaster` CLI. It parses arguments,
//! dispatches to the appropriate command handler, and handles errors with
//! proper exit codes.

mod cli;
mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod exit_codes;
pub mod locks;
pub mod logging;
pub mod pidfile;
pub mod privs;
pub mod runner;
pub mod signals;
pub mod supervisor;

use cli::Cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    match commands::dispatch(cli) {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            // Print user-actionable error message to stderr
            eprintln!("Error: {}", err);

            // Return appropriate exit code
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
