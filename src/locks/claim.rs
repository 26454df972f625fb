//! Claim file naming.
//!
//! A claim file lives next to the lock file and is named
//! `<lock-file-name>.<token>.<hostname>.<pid>`. The lock file's content is the
//! path of the winning claim file, so anyone can recover the owner's host and
//! pid without trusting anything else on disk.

use crate::error::{QmasterError, Result};
use nix::unistd::Pid;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

/// Identity of a lock claim, decoded from its claim file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// Per-acquisition nonce; never contains a dot.
    pub token: String,

    /// Host the owning process runs on. May itself contain dots.
    pub host: String,

    /// Pid of the owning process on `host`.
    pub pid: Pid,
}

impl Claim {
    pub fn new(token: impl Into<String>, host: impl Into<String>, pid: Pid) -> Self {
        Self {
            token: token.into(),
            host: host.into(),
            pid,
        }
    }

    /// Claim for the calling process on the local host.
    pub fn local(token: impl Into<String>, pid: Pid) -> Self {
        Self::new(token, local_hostname(), pid)
    }

    /// File name of this claim for the given lock file.
    pub fn file_name(&self, lock_file: &Path) -> String {
        format!(
            "{}.{}.{}.{}",
            lock_base_name(lock_file),
            self.token,
            self.host,
            self.pid
        )
    }

    /// Full path of this claim file, in the same directory as the lock file.
    pub fn path(&self, lock_file: &Path) -> PathBuf {
        let dir = lock_file.parent().unwrap_or(Path::new("."));
        dir.join(self.file_name(lock_file))
    }

    /// Decode a claim from the name (or path) of a claim file.
    pub fn parse(lock_file: &Path, name: &str) -> Result<Self> {
        let malformed = || {
            QmasterError::Lock(format!(
                "malformed claim '{}' in lock file '{}'",
                name,
                lock_file.display()
            ))
        };

        let file_name = Path::new(name.trim())
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(malformed)?;

        let prefix = format!("{}.", lock_base_name(lock_file));
        let rest = file_name.strip_prefix(&prefix).ok_or_else(malformed)?;
        let (token, rest) = rest.split_once('.').ok_or_else(malformed)?;
        let (host, pid) = rest.rsplit_once('.').ok_or_else(malformed)?;
        let pid: i32 = pid.parse().map_err(|_| malformed())?;

        if token.is_empty() || host.is_empty() || pid <= 0 {
            return Err(malformed());
        }

        Ok(Self::new(token, host, Pid::from_raw(pid)))
    }

    /// Read the claim currently recorded in a lock file.
    pub fn read(lock_file: &Path) -> Result<Self> {
        let content = fs::read_to_string(lock_file).map_err(|e| {
            QmasterError::Lock(format!(
                "failed to read lock file '{}': {}",
                lock_file.display(),
                e
            ))
        })?;
        Self::parse(lock_file, &content)
    }
}

impl fmt::Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {} on {}", self.pid, self.host)
    }
}

/// Generate a fresh claim token.
///
/// Unique per call within a process (counter) and across restarts (clock).
pub fn new_token() -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}{:x}", nanos, seq)
}

/// Name of the local host, as recorded in claims.
pub fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}

fn lock_base_name(lock_file: &Path) -> String {
    lock_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "lock".to_string())
}
