//! Pid file for the running master.
//!
//! The pid file is the rendezvous point between the operator-facing commands
//! (`stop`, `restart`, `reopen`) and the detached master. It contains the
//! master's pid in decimal followed by a newline.
//!
//! Writes are atomic: the content goes to `.{name}.tmp` in the same directory,
//! is synced, and is renamed over the target, so a reader never observes a
//! partially written pid. The file is created under umask `006` so that only
//! the owner and group can read or write it.

use crate::error::{QmasterError, Result};
use nix::sys::stat::{Mode, umask};
use nix::unistd::Pid;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Record `pid` in the pid file.
pub fn write_pid_file(path: &Path, pid: Pid) -> Result<()> {
    let previous = umask(Mode::from_bits_truncate(0o006));
    let result = atomic_write(path, format!("{}\n", pid).as_bytes());
    umask(previous);
    result
}

/// Read the pid recorded in the pid file.
pub fn read_pid_file(path: &Path) -> Result<Pid> {
    let content = fs::read_to_string(path).map_err(|e| {
        QmasterError::Daemon(format!(
            "failed to read pid file '{}': {}",
            path.display(),
            e
        ))
    })?;

    content
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|pid| *pid > 0)
        .map(Pid::from_raw)
        .ok_or_else(|| {
            QmasterError::Daemon(format!(
                "pid file '{}' does not contain a valid pid: {:?}",
                path.display(),
                content.trim()
            ))
        })
}

/// Remove the pid file; a missing file is not an error.
pub fn remove_pid_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(QmasterError::Daemon(format!(
            "failed to remove pid file '{}': {}",
            path.display(),
            e
        ))),
    }
}

fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            QmasterError::Daemon(format!(
                "failed to create pid file directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let temp_path = temp_path_for(path)?;
    write_and_sync(&temp_path, content)?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        QmasterError::Daemon(format!(
            "failed to replace pid file '{}': {}",
            path.display(),
            e
        ))
    })
}

fn temp_path_for(target: &Path) -> Result<PathBuf> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            QmasterError::Daemon(format!("invalid pid file path '{}'", target.display()))
        })?;

    Ok(parent.join(format!(".{}.tmp", filename)))
}

fn write_and_sync(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| {
        QmasterError::Daemon(format!(
            "failed to create temporary file '{}': {}",
            path.display(),
            e
        ))
    })?;

    file.write_all(content)
        .and_then(|()| file.sync_all())
        .map_err(|e| {
            let _ = fs::remove_file(path);
            QmasterError::Daemon(format!(
                "failed to write temporary file '{}': {}",
                path.display(),
                e
            ))
        })
}
