//! The live pid to runner map.

use crate::runner::RunnerSpec;
use nix::unistd::Pid;
use std::collections::HashMap;

/// Bookkeeping for one live runner process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildInfo {
    pub spec: RunnerSpec,
    /// Failures of this runner identity so far in this run.
    pub restarts: u32,
}

/// Runners the master is currently responsible for.
///
/// Entries are added only when a launch succeeds and removed only when the
/// process is observed to have exited (or found to be gone while draining).
#[derive(Debug, Default)]
pub struct ChildTable {
    children: HashMap<Pid, ChildInfo>,
}

impl ChildTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pid: Pid, info: ChildInfo) {
        self.children.insert(pid, info);
    }

    pub fn remove(&mut self, pid: Pid) -> Option<ChildInfo> {
        self.children.remove(&pid)
    }

    #[cfg(test)]
    pub fn get(&self, pid: Pid) -> Option<&ChildInfo> {
        self.children.get(&pid)
    }

    /// Snapshot of tracked pids, sorted for deterministic broadcast order.
    pub fn pids(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.children.keys().copied().collect();
        pids.sort_by_key(|pid| pid.as_raw());
        pids
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(class: &str) -> ChildInfo {
        ChildInfo {
            spec: RunnerSpec::new(class, 0, 1),
            restarts: 0,
        }
    }

    #[test]
    fn test_insert_and_remove() {
        let mut table = ChildTable::new();
        table.insert(Pid::from_raw(30), info("ArchRunner"));
        table.insert(Pid::from_raw(10), info("NewsRunner"));

        assert_eq!(table.len(), 2);
        assert_eq!(table.pids(), vec![Pid::from_raw(10), Pid::from_raw(30)]);
        assert_eq!(table.get(Pid::from_raw(30)).unwrap().spec.class, "ArchRunner");

        let removed = table.remove(Pid::from_raw(30)).unwrap();
        assert_eq!(removed.spec.class, "ArchRunner");
        assert!(table.remove(Pid::from_raw(30)).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_empty_table() {
        let table = ChildTable::new();
        assert!(table.is_empty());
        assert!(table.pids().is_empty());
    }
}
