//! Master lock for qmaster.
//!
//! Guarantees that at most one master supervisor runs against an installation,
//! even when the lock directory is shared between hosts over NFS.
//!
//! # Lock Files
//!
//! Two files make up a claim:
//! - the claim file `<lock>.<token>.<host>.<pid>`, created by the claimant
//! - the lock file itself, a hard link to the winning claim file
//!
//! Linking is atomic, so exactly one claimant succeeds. The lock file's content
//! is the path of the claim file it links to, which lets a competing claimant
//! recover the owner's host and pid (see [`Claim`]).
//!
//! # Lease
//!
//! The lease expiry is stored as the lock file's modification time, set to
//! `now + lifetime` on acquisition and on every [`MasterLock::refresh`]. A
//! claimant that finds a lock whose expiry is more than [`CLOCK_SLOP`] in the
//! past breaks it.
//!
//! # Ownership
//!
//! An owned lock is released when dropped. A parent handing the lock to a
//! forked child calls [`MasterLock::transfer_to`], after which only the child,
//! once it has called [`MasterLock::assume_ownership`], refreshes and releases.

mod claim;
mod conflict;

#[cfg(test)]
mod tests;

pub use claim::{Claim, local_hostname, new_token};
pub use conflict::{Conflict, classify, classify_with, process_exists};

use crate::error::{QmasterError, Result};
use nix::unistd::Pid;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// Tolerated clock skew between hosts sharing the lock directory.
pub const CLOCK_SLOP: Duration = Duration::from_secs(10);

/// Forced takeovers attempted before a stale conflict is reported.
pub const MAX_TAKEOVER_ATTEMPTS: u32 = 1;

/// Retries when the lock vanished between a timeout and reading its holder.
pub const MAX_VANISHED_RETRIES: u32 = 1;

const RETRY_INTERVAL: Duration = Duration::from_millis(50);
const TRANSFER_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Something whose lease must be renewed periodically while it is held.
pub trait Lease {
    /// Extend the lease without giving up ownership.
    fn refresh(&mut self) -> Result<()>;
}

/// The cross-host master lock.
#[derive(Debug)]
pub struct MasterLock {
    lock_file: PathBuf,
    lifetime: Duration,
    token: String,
    claim_file: PathBuf,
    owned: bool,
}

impl MasterLock {
    /// Create an unclaimed lock handle for the calling process.
    pub fn new(lock_file: impl Into<PathBuf>, lifetime: Duration) -> Self {
        let lock_file = lock_file.into();
        let token = new_token();
        let claim_file = Claim::local(token.clone(), Pid::this()).path(&lock_file);
        Self {
            lock_file,
            lifetime,
            token,
            claim_file,
            owned: false,
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.lock_file
    }

    /// Path of this handle's claim file.
    pub fn claim_file(&self) -> &Path {
        &self.claim_file
    }

    /// Whether this handle will release the lock when dropped.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Try to claim the lock, waiting at most `timeout`.
    ///
    /// Expired leases found along the way are broken. On timeout this handle's
    /// claim file is removed and [`QmasterError::LockTimeout`] is returned;
    /// use [`Claim::read`] and [`classify`] to find out who holds the lock.
    pub fn acquire(&mut self, timeout: Duration) -> Result<()> {
        let deadline = deadline_after(timeout)?;
        // An unrepresentable lease must fail before any file is written.
        self.lease_expiry()?;

        self.ensure_lock_dir()?;
        self.write_claim(&self.claim_file)?;
        self.touch(&self.claim_file)?;

        loop {
            match fs::hard_link(&self.claim_file, &self.lock_file) {
                Ok(()) => {
                    self.owned = true;
                    self.touch(&self.lock_file)?;
                    debug!(lock = %self.lock_file.display(), "acquired master lock");
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.is_locked() {
                        return Err(QmasterError::Lock(format!(
                            "lock '{}' is already held by this handle",
                            self.lock_file.display()
                        )));
                    }
                }
                Err(e) => {
                    return Err(QmasterError::Lock(format!(
                        "failed to link '{}' to '{}': {}",
                        self.claim_file.display(),
                        self.lock_file.display(),
                        e
                    )));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                remove_if_exists(&self.claim_file)?;
                return Err(QmasterError::LockTimeout {
                    path: self.lock_file.clone(),
                });
            }

            if self.lease_expired() {
                self.break_lock()?;
                continue;
            }

            thread::sleep(RETRY_INTERVAL.min(deadline - now));
        }
    }

    /// Whether this handle's claim is the one the lock file points at.
    pub fn is_locked(&self) -> bool {
        self.link_count(&self.claim_file) == Some(2)
            && self.read_lock().as_deref() == Some(self.claim_str().as_str())
    }

    /// Push the lease expiry to `now + lifetime`.
    pub fn refresh(&mut self) -> Result<()> {
        if !self.is_locked() {
            return Err(QmasterError::Lock(format!(
                "cannot refresh '{}': lock is not held by {}",
                self.lock_file.display(),
                self.claim_file.display()
            )));
        }
        self.touch(&self.lock_file)?;
        debug!(lock = %self.lock_file.display(), "refreshed master lock");
        Ok(())
    }

    /// Remove the lock and this handle's claim file, whoever refreshed it last.
    pub fn release(&mut self) -> Result<()> {
        self.owned = false;
        remove_if_exists(&self.lock_file)?;
        remove_if_exists(&self.claim_file)?;
        debug!(lock = %self.lock_file.display(), "released master lock");
        Ok(())
    }

    /// Stop treating the lock as ours without touching any files.
    pub fn disown(&mut self) {
        self.owned = false;
    }

    /// Hand the held lock to another local process without releasing it.
    ///
    /// Afterwards the lock file names the claim file of `pid`, and this
    /// handle no longer owns the lock.
    pub fn transfer_to(&mut self, pid: Pid) -> Result<()> {
        let previous = self.read_lock().ok_or_else(|| {
            QmasterError::Lock(format!(
                "cannot transfer '{}': lock file is unreadable",
                self.lock_file.display()
            ))
        })?;

        let target = Claim::local(self.token.clone(), pid).path(&self.lock_file);
        fs::hard_link(&self.lock_file, &target).map_err(|e| {
            QmasterError::Lock(format!(
                "failed to link '{}' to '{}': {}",
                self.lock_file.display(),
                target.display(),
                e
            ))
        })?;

        // The new claim shares the lock file's inode, so this rewrites the lock.
        self.write_claim(&target)?;
        self.touch(&self.lock_file)?;

        self.owned = false;
        self.claim_file = target;
        remove_if_exists(Path::new(&previous))?;

        info!(lock = %self.lock_file.display(), pid = %pid, "transferred master lock");
        Ok(())
    }

    /// Take over a lock transferred to the calling process.
    ///
    /// Waits up to `timeout` for the sender's [`transfer_to`](Self::transfer_to)
    /// to complete.
    pub fn assume_ownership(&mut self, timeout: Duration) -> Result<()> {
        self.claim_file = Claim::local(self.token.clone(), Pid::this()).path(&self.lock_file);
        let deadline = deadline_after(timeout)?;

        while !self.is_locked() {
            let now = Instant::now();
            if now >= deadline {
                return Err(QmasterError::Lock(format!(
                    "timed out waiting for '{}' to be transferred to pid {}",
                    self.lock_file.display(),
                    Pid::this()
                )));
            }
            thread::sleep(TRANSFER_POLL_INTERVAL.min(deadline - now));
        }

        self.owned = true;
        Ok(())
    }

    /// Delete a stale claim's files so the lock can be claimed again.
    ///
    /// Only call this after [`classify`] returned [`Conflict::SameHostStale`].
    pub fn force_takeover(&mut self, stale: &Claim) -> Result<()> {
        self.disown();
        remove_if_exists(&self.lock_file)?;
        remove_if_exists(&stale.path(&self.lock_file))?;
        warn!(
            lock = %self.lock_file.display(),
            pid = %stale.pid,
            host = %stale.host,
            "removed stale master lock"
        );
        Ok(())
    }

    /// Lease expiry currently recorded on the lock file.
    pub fn expiry(&self) -> Option<SystemTime> {
        fs::metadata(&self.lock_file).and_then(|m| m.modified()).ok()
    }

    fn lease_expired(&self) -> bool {
        match self.expiry() {
            Some(expiry) => expiry
                .checked_add(CLOCK_SLOP)
                .is_some_and(|limit| SystemTime::now() > limit),
            None => false,
        }
    }

    fn break_lock(&self) -> Result<()> {
        // Push the expiry forward first so nobody else breaks it concurrently.
        if self.touch(&self.lock_file).is_err() {
            return Ok(());
        }

        if let Some(winner) = self.read_lock() {
            remove_if_exists(Path::new(&winner))?;
        }
        remove_if_exists(&self.lock_file)?;
        warn!(lock = %self.lock_file.display(), "broke expired master lock");
        Ok(())
    }

    fn ensure_lock_dir(&self) -> Result<()> {
        if let Some(parent) = self.lock_file.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| {
                QmasterError::Lock(format!(
                    "failed to create lock directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    fn claim_str(&self) -> String {
        self.claim_file.to_string_lossy().to_string()
    }

    fn write_claim(&self, path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                QmasterError::Lock(format!(
                    "failed to open claim file '{}': {}",
                    path.display(),
                    e
                ))
            })?;

        file.write_all(path.to_string_lossy().as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| {
                QmasterError::Lock(format!(
                    "failed to write claim file '{}': {}",
                    path.display(),
                    e
                ))
            })
    }

    fn lease_expiry(&self) -> Result<SystemTime> {
        SystemTime::now().checked_add(self.lifetime).ok_or_else(|| {
            QmasterError::Lock(format!(
                "lease lifetime of {:?} on '{}' is too long",
                self.lifetime,
                self.lock_file.display()
            ))
        })
    }

    fn touch(&self, path: &Path) -> Result<()> {
        let expiry = self.lease_expiry()?;
        OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|file| file.set_modified(expiry))
            .map_err(|e| {
                QmasterError::Lock(format!(
                    "failed to set lease expiry on '{}': {}",
                    path.display(),
                    e
                ))
            })
    }

    fn read_lock(&self) -> Option<String> {
        fs::read_to_string(&self.lock_file)
            .ok()
            .map(|s| s.trim().to_string())
    }

    fn link_count(&self, path: &Path) -> Option<u64> {
        fs::metadata(path).map(|m| m.nlink()).ok()
    }
}

impl Lease for MasterLock {
    fn refresh(&mut self) -> Result<()> {
        MasterLock::refresh(self)
    }
}

impl Drop for MasterLock {
    fn drop(&mut self) {
        if self.owned
            && let Err(e) = self.release()
        {
            warn!(lock = %self.lock_file.display(), error = %e, "failed to release master lock");
        }
    }
}

/// Acquire the master lock, optionally clearing a stale same-host claim.
///
/// With `force`, a conflict classified as [`Conflict::SameHostStale`] is taken
/// over and acquisition retried, at most [`MAX_TAKEOVER_ATTEMPTS`] times.
/// Any other conflict is returned as [`QmasterError::LockConflict`].
pub fn acquire_master_lock(
    lock_file: &Path,
    lifetime: Duration,
    timeout: Duration,
    force: bool,
) -> Result<MasterLock> {
    let mut lock = MasterLock::new(lock_file, lifetime);
    let mut takeovers = 0;
    let mut vanished = 0;

    loop {
        match lock.acquire(timeout) {
            Ok(()) => return Ok(lock),
            Err(QmasterError::LockTimeout { path }) => {
                let Some(holder) = read_holder(&path)? else {
                    if vanished < MAX_VANISHED_RETRIES {
                        vanished += 1;
                        debug!(lock = %path.display(), "master lock released while reading holder");
                        continue;
                    }
                    return Err(QmasterError::Lock(format!(
                        "lock '{}' keeps changing hands; try again",
                        path.display()
                    )));
                };
                let conflict = classify(&holder)?;

                if force && conflict.is_stale() && takeovers < MAX_TAKEOVER_ATTEMPTS {
                    takeovers += 1;
                    lock.force_takeover(&holder)?;
                    continue;
                }

                return Err(QmasterError::LockConflict { path, conflict });
            }
            Err(e) => return Err(e),
        }
    }
}

/// Read the claim holding `lock_file`, or `None` if the lock was released.
pub fn read_holder(lock_file: &Path) -> Result<Option<Claim>> {
    match Claim::read(lock_file) {
        Ok(claim) => Ok(Some(claim)),
        Err(_) if !lock_file.exists() => Ok(None),
        Err(e) => Err(e),
    }
}

fn deadline_after(timeout: Duration) -> Result<Instant> {
    Instant::now().checked_add(timeout).ok_or_else(|| {
        QmasterError::Lock(format!("lock timeout of {:?} is too long", timeout))
    })
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(QmasterError::Lock(format!(
            "failed to remove '{}': {}",
            path.display(),
            e
        ))),
    }
}
