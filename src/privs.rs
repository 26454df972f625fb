//! Running as the configured mail user.
//!
//! The master must run as the installation's user and group so that its
//! runners can read and write the queue. Started as root, it switches to that
//! identity; started as anyone else, it refuses to run.

use crate::error::{QmasterError, Result};
use nix::unistd::{Gid, Group, Uid, User, getuid, initgroups, setgid, setuid};
use std::ffi::CString;
use tracing::info;

/// A user name together with the ids it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: String,
    pub uid: Uid,
    pub gid: Gid,
}

impl Identity {
    pub fn lookup(user: &str, group: &str) -> Result<Self> {
        let uid = User::from_name(user)
            .ok()
            .flatten()
            .map(|u| u.uid)
            .ok_or_else(|| QmasterError::Privilege(format!("Unknown user: {}", user)))?;
        let gid = Group::from_name(group)
            .ok()
            .flatten()
            .map(|g| g.gid)
            .ok_or_else(|| QmasterError::Privilege(format!("Unknown group: {}", group)))?;

        Ok(Self {
            user: user.to_string(),
            uid,
            gid,
        })
    }
}

/// What the calling process has to do to become `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    /// Running as root: drop to the target identity.
    Drop,
    /// Already running as the target user.
    Keep,
}

pub fn plan_switch(current: Uid, target: &Identity) -> Result<Switch> {
    if current.is_root() {
        Ok(Switch::Drop)
    } else if current == target.uid {
        Ok(Switch::Keep)
    } else {
        Err(QmasterError::Privilege(format!(
            "Run this program as root or as the {} user, or use -u.",
            target.user
        )))
    }
}

/// Make sure the process runs as `user`/`group`, switching if started as root.
pub fn check_privileges(user: &str, group: &str) -> Result<()> {
    let target = Identity::lookup(user, group)?;
    match plan_switch(getuid(), &target)? {
        Switch::Keep => Ok(()),
        Switch::Drop => drop_to(&target),
    }
}

fn drop_to(target: &Identity) -> Result<()> {
    let name = CString::new(target.user.as_str()).map_err(|_| {
        QmasterError::Privilege(format!("invalid user name: {:?}", target.user))
    })?;

    // Groups first: after setuid the process may no longer change them.
    initgroups(&name, target.gid)
        .and_then(|()| setgid(target.gid))
        .and_then(|()| setuid(target.uid))
        .map_err(|e| {
            QmasterError::Privilege(format!(
                "failed to switch to user {} (uid {}, gid {}): {}",
                target.user, target.uid, target.gid, e
            ))
        })?;

    info!(user = %target.user, uid = %target.uid, gid = %target.gid, "dropped privileges");
    Ok(())
}
