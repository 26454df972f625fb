//! Tests for the master lock.

use super::*;
use std::os::unix::fs::MetadataExt;
use std::process::{Child, Command};
use std::time::Duration;
use tempfile::TempDir;

const LIFETIME: Duration = Duration::from_secs(3600);
const SHORT: Duration = Duration::from_millis(200);

fn lock_path(dir: &TempDir) -> PathBuf {
    dir.path().join("locks").join("master-qrunner")
}

/// Plant a claim on disk as if another process had acquired the lock.
fn plant_claim(lock_file: &Path, claim: &Claim, expiry: SystemTime) {
    fs::create_dir_all(lock_file.parent().unwrap()).unwrap();
    let claim_path = claim.path(lock_file);
    fs::write(&claim_path, claim_path.to_string_lossy().as_bytes()).unwrap();
    fs::hard_link(&claim_path, lock_file).unwrap();
    OpenOptions::new()
        .write(true)
        .open(lock_file)
        .unwrap()
        .set_modified(expiry)
        .unwrap();
}

fn dead_pid() -> Pid {
    let mut child = Command::new("true").spawn().unwrap();
    let pid = Pid::from_raw(child.id() as i32);
    child.wait().unwrap();
    pid
}

fn sleeper() -> Child {
    Command::new("sleep").arg("30").spawn().unwrap()
}

fn handle_with_token(lock_file: &Path, token: &str, pid: Pid) -> MasterLock {
    MasterLock {
        lock_file: lock_file.to_path_buf(),
        lifetime: LIFETIME,
        token: token.to_string(),
        claim_file: Claim::local(token, pid).path(lock_file),
        owned: false,
    }
}

#[test]
fn test_acquire_links_claim_and_sets_lease() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);
    let mut lock = MasterLock::new(&path, LIFETIME);

    lock.acquire(SHORT).unwrap();

    assert!(lock.is_owned());
    assert!(lock.is_locked());
    assert_eq!(fs::metadata(&path).unwrap().nlink(), 2);

    let holder = Claim::read(&path).unwrap();
    assert_eq!(holder.pid, Pid::this());
    assert_eq!(holder.host, local_hostname());
    assert_eq!(holder.path(&path), lock.claim_file());

    let expiry = lock.expiry().unwrap();
    assert!(expiry > SystemTime::now() + LIFETIME - Duration::from_secs(60));
}

#[test]
fn test_release_removes_both_files() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);
    let mut lock = MasterLock::new(&path, LIFETIME);
    lock.acquire(SHORT).unwrap();
    let claim_file = lock.claim_file().to_path_buf();

    lock.release().unwrap();

    assert!(!path.exists());
    assert!(!claim_file.exists());
    assert!(!lock.is_owned());
}

#[test]
fn test_drop_releases_owned_lock() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);
    {
        let mut lock = MasterLock::new(&path, LIFETIME);
        lock.acquire(SHORT).unwrap();
        assert!(path.exists());
    }
    assert!(!path.exists());
}

#[test]
fn test_disowned_lock_survives_drop() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);
    {
        let mut lock = MasterLock::new(&path, LIFETIME);
        lock.acquire(SHORT).unwrap();
        lock.disown();
    }
    assert!(path.exists());
}

#[test]
fn test_concurrent_acquire_has_one_winner() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);

    let contenders: Vec<_> = (0..2)
        .map(|_| {
            let path = path.clone();
            std::thread::spawn(move || {
                let mut lock = MasterLock::new(&path, LIFETIME);
                let result = lock.acquire(SHORT);
                (lock, result)
            })
        })
        .collect();

    let outcomes: Vec<_> = contenders.into_iter().map(|h| h.join().unwrap()).collect();

    let winners = outcomes.iter().filter(|(_, r)| r.is_ok()).count();
    assert_eq!(winners, 1);

    let (_, loser) = outcomes.iter().find(|(_, r)| r.is_err()).unwrap();
    assert!(matches!(loser, Err(QmasterError::LockTimeout { .. })));

    let conflict = classify(&Claim::read(&path).unwrap()).unwrap();
    assert_eq!(conflict, Conflict::SameHostAlive { pid: Pid::this() });
}

#[test]
fn test_timed_out_claimant_removes_its_claim_file() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);
    let mut winner = MasterLock::new(&path, LIFETIME);
    winner.acquire(SHORT).unwrap();

    let mut loser = MasterLock::new(&path, LIFETIME);
    assert!(loser.acquire(Duration::ZERO).is_err());
    assert!(!loser.claim_file().exists());
    assert!(winner.is_locked());
}

#[test]
fn test_stale_claim_is_reported_then_taken_over() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);
    let stale = Claim::local("dead", dead_pid());
    plant_claim(&path, &stale, SystemTime::now() + LIFETIME);

    let err = acquire_master_lock(&path, LIFETIME, SHORT, false).unwrap_err();
    match err {
        QmasterError::LockConflict { conflict, .. } => {
            assert_eq!(conflict, Conflict::SameHostStale { pid: stale.pid });
        }
        other => panic!("expected conflict, got {:?}", other),
    }

    let lock = acquire_master_lock(&path, LIFETIME, SHORT, true).unwrap();
    assert!(lock.is_locked());
    assert!(!stale.path(&path).exists());
    assert_eq!(Claim::read(&path).unwrap().pid, Pid::this());
}

#[test]
fn test_live_claim_is_never_forced() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);
    let mut owner = MasterLock::new(&path, LIFETIME);
    owner.acquire(SHORT).unwrap();

    let err = acquire_master_lock(&path, LIFETIME, SHORT, true).unwrap_err();
    assert!(matches!(
        err,
        QmasterError::LockConflict {
            conflict: Conflict::SameHostAlive { .. },
            ..
        }
    ));
    assert!(owner.is_locked());
}

#[test]
fn test_other_host_claim_is_never_forced() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);
    let remote = Claim::new("far", "elsewhere.invalid", Pid::from_raw(1));
    plant_claim(&path, &remote, SystemTime::now() + LIFETIME);

    let err = acquire_master_lock(&path, LIFETIME, SHORT, true).unwrap_err();
    match err {
        QmasterError::LockConflict { conflict, .. } => {
            assert_eq!(
                conflict,
                Conflict::OtherHost {
                    host: "elsewhere.invalid".to_string()
                }
            );
        }
        other => panic!("expected conflict, got {:?}", other),
    }
    assert!(path.exists());
    assert!(remote.path(&path).exists());
}

#[test]
fn test_expired_lease_is_broken() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);
    let remote = Claim::new("old", "elsewhere.invalid", Pid::from_raw(1));
    plant_claim(
        &path,
        &remote,
        SystemTime::now() - CLOCK_SLOP - Duration::from_secs(60),
    );

    let mut lock = MasterLock::new(&path, LIFETIME);
    lock.acquire(SHORT).unwrap();

    assert!(lock.is_locked());
    assert!(!remote.path(&path).exists());
}

#[test]
fn test_refresh_extends_lease_and_keeps_ownership() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);
    let mut lock = MasterLock::new(&path, LIFETIME);
    lock.acquire(SHORT).unwrap();

    // Pretend the lease is about to run out.
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(1))
        .unwrap();

    for _ in 0..3 {
        lock.refresh().unwrap();
        let mut prober = MasterLock::new(&path, LIFETIME);
        assert!(prober.acquire(Duration::from_millis(20)).is_err());
        let conflict = classify(&Claim::read(&path).unwrap()).unwrap();
        assert!(!conflict.is_stale());
    }

    assert!(lock.expiry().unwrap() > SystemTime::now() + Duration::from_secs(60));
    assert!(lock.is_locked());
}

#[test]
fn test_refresh_without_lock_fails() {
    let dir = TempDir::new().unwrap();
    let mut lock = MasterLock::new(lock_path(&dir), LIFETIME);
    let err = lock.refresh().unwrap_err();
    assert!(err.to_string().contains("not held"));
}

#[test]
fn test_transfer_and_assume_ownership() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);
    let mut parent = MasterLock::new(&path, LIFETIME);
    parent.acquire(SHORT).unwrap();
    let original_claim = parent.claim_file().to_path_buf();

    let mut child = sleeper();
    let child_pid = Pid::from_raw(child.id() as i32);

    parent.transfer_to(child_pid).unwrap();

    assert!(!parent.is_owned());
    assert!(!original_claim.exists());
    let holder = Claim::read(&path).unwrap();
    assert_eq!(holder.pid, child_pid);
    assert_eq!(holder.token, parent.token);
    assert_eq!(fs::metadata(&path).unwrap().nlink(), 2);

    // Hand it back to this process and take possession, as a daemon child would.
    let mut relay = handle_with_token(&path, &parent.token, child_pid);
    relay.transfer_to(Pid::this()).unwrap();

    let mut receiver = handle_with_token(&path, &parent.token, child_pid);
    receiver.assume_ownership(SHORT).unwrap();
    assert!(receiver.is_owned());
    assert!(receiver.is_locked());
    receiver.refresh().unwrap();
    receiver.release().unwrap();
    assert!(!path.exists());

    child.kill().unwrap();
    child.wait().unwrap();
}

#[test]
fn test_assume_ownership_times_out_without_transfer() {
    let dir = TempDir::new().unwrap();
    let mut lock = MasterLock::new(lock_path(&dir), LIFETIME);
    let err = lock.assume_ownership(Duration::from_millis(50)).unwrap_err();
    assert!(err.to_string().contains("timed out waiting"));
    assert!(!lock.is_owned());
}

#[test]
fn test_lease_trait_refreshes_lock() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);
    let mut lock = MasterLock::new(&path, LIFETIME);
    lock.acquire(SHORT).unwrap();

    let lease: &mut dyn Lease = &mut lock;
    lease.refresh().unwrap();
}

#[test]
fn test_oversized_lifetime_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);
    let mut lock = MasterLock::new(&path, Duration::MAX);

    let err = lock.acquire(SHORT).unwrap_err();
    assert!(matches!(err, QmasterError::Lock(_)));
    assert!(err.to_string().contains("too long"));
    assert!(!path.parent().unwrap().exists());
    assert!(!lock.is_owned());
}

#[test]
fn test_oversized_timeout_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);

    let err = MasterLock::new(&path, LIFETIME).acquire(Duration::MAX).unwrap_err();
    assert!(err.to_string().contains("lock timeout"));

    let err = acquire_master_lock(&path, Duration::MAX, SHORT, false).unwrap_err();
    assert!(matches!(err, QmasterError::Lock(_)));
    assert!(!path.exists());
}

#[test]
fn test_read_holder_of_released_lock_is_none() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);
    assert!(read_holder(&path).unwrap().is_none());

    let mut lock = MasterLock::new(&path, LIFETIME);
    lock.acquire(SHORT).unwrap();
    assert_eq!(read_holder(&path).unwrap().unwrap().pid, Pid::this());

    lock.release().unwrap();
    assert!(read_holder(&path).unwrap().is_none());
}

#[test]
fn test_read_holder_of_garbled_lock_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = lock_path(&dir);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "garbage").unwrap();

    assert!(read_holder(&path).is_err());
}
