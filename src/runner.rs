//! Queue runner processes.
//!
//! A runner is identified by its class name, its slice index, and the number
//! of slices its class is split into. The triple is passed to the runner
//! program as `--runner=<class>:<slice>:<count>`; the runner uses it to pick
//! its partition of the queue.

use crate::config::{Config, RunnerClass};
use crate::error::{QmasterError, Result};
use nix::unistd::Pid;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Identity of one queue runner slice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunnerSpec {
    pub class: String,
    pub slice: u32,
    pub count: u32,
}

impl RunnerSpec {
    pub fn new(class: impl Into<String>, slice: u32, count: u32) -> Self {
        Self {
            class: class.into(),
            slice,
            count,
        }
    }

    /// Every slice of every class in the roster, in roster order.
    pub fn expand(roster: &[RunnerClass]) -> Vec<RunnerSpec> {
        roster
            .iter()
            .flat_map(|class| {
                (0..class.count).map(move |slice| Self::new(&class.name, slice, class.count))
            })
            .collect()
    }

    /// The `--runner=` switch identifying this slice.
    pub fn switch(&self) -> String {
        format!("--runner={}", self)
    }
}

impl fmt::Display for RunnerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.class, self.slice, self.count)
    }
}

/// Builds and spawns runner processes.
#[derive(Debug, Clone)]
pub struct Launcher {
    program: String,
    args: Vec<String>,
    config_path: Option<PathBuf>,
}

impl Launcher {
    /// `args` are passed to every runner ahead of its `--runner=` switch.
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            config_path,
        }
    }

    pub fn from_config(config: &Config, config_path: Option<&Path>) -> Result<Self> {
        let mut argv = config.runner_argv()?.into_iter();
        let program = argv.next().ok_or_else(|| {
            QmasterError::Config("runner_command must not be empty".to_string())
        })?;
        Ok(Self::new(
            program,
            argv.collect(),
            config_path.map(Path::to_path_buf),
        ))
    }

    /// Full command line for one runner slice.
    pub fn command(&self, spec: &RunnerSpec) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(spec.switch());
        if let Some(path) = &self.config_path {
            command.arg("-C").arg(path);
        }
        command.stdin(Stdio::null());
        command
    }

    /// Start one runner and return its pid.
    ///
    /// The child never runs supervisor code: if the program cannot be
    /// executed, the failure is reported here, in the master, instead.
    pub fn launch(&self, spec: &RunnerSpec) -> Result<Pid> {
        let child = self
            .command(spec)
            .spawn()
            .map_err(|e| QmasterError::Launch {
                runner: spec.to_string(),
                reason: e.to_string(),
            })?;

        let pid = Pid::from_raw(child.id() as i32);
        debug!(pid = %pid, runner = %spec, "launched queue runner");
        Ok(pid)
    }
}
