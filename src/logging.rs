//! Log output for the master.
//!
//! The daemon logs through `tracing` into a file that can be closed and
//! reopened on demand, so operators can rotate it and then send `reopen`.

use crate::error::{QmasterError, Result};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::MutexGuardWriter;

/// Environment variable holding the log filter, in `EnvFilter` syntax.
pub const LOG_ENV: &str = "QMASTER_LOG";

const DEFAULT_FILTER: &str = "info";

/// An append-mode log file shared by every clone of the handle.
#[derive(Debug, Clone)]
pub struct LogFile {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl LogFile {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the current file and open `path` again.
    ///
    /// On failure the old file stays in use.
    pub fn reopen(&self) -> Result<()> {
        let fresh = open_append(&self.path)?;
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        *file = fresh;
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = MutexGuardWriter<'a, File>;

    fn make_writer(&'a self) -> Self::Writer {
        self.file.make_writer()
    }
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| {
            QmasterError::Config(format!(
                "failed to create log directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            QmasterError::Config(format!(
                "failed to open log file '{}': {}",
                path.display(),
                e
            ))
        })
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber, writing to `log_path`.
///
/// Falls back to stderr when the log file cannot be opened; the returned
/// handle is `None` in that case. Only the first call takes effect.
pub fn init(log_path: &Path) -> Option<LogFile> {
    match LogFile::open(log_path) {
        Ok(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_writer(file.clone())
                .try_init();
            Some(file)
        }
        Err(_) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .try_init();
            None
        }
    }
}
