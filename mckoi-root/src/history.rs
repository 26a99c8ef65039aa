// The root server's per-path history: a ring buffer of recent commits,
// retained so a transaction whose base root has since advanced can still
// be classified for conflicts (spec §4.3, default depth 64).

use std::collections::VecDeque;

use mckoi_net::NodeId;

use mckoi_base::TouchedRangeSummary;

pub const DEFAULT_HISTORY_DEPTH: usize = 64;

#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub root: NodeId,
    pub commit_id: u64,
    pub touched: TouchedRangeSummary,
    /// Set on an entry appended by `RootServer::rollback` rather than an
    /// ordinary commit (SPEC_FULL.md §4.3.5).
    pub is_rollback: bool,
}

pub struct History {
    depth: usize,
    entries: VecDeque<HistoryEntry>,
}

impl History {
    pub fn new(depth: usize) -> Self {
        History { depth: depth.max(1), entries: VecDeque::new() }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.depth {
            self.entries.pop_front();
        }
    }

    pub fn latest_commit_id(&self) -> u64 {
        self.entries.back().map(|e| e.commit_id).unwrap_or(0)
    }

    /// Finds `root`'s position and returns every entry strictly newer than
    /// it, or `None` if `root` has already aged out of the ring (the
    /// commit must fail with `CommitFault::BaseTooOld`, spec §4.3.2 step 3).
    pub fn entries_since(&self, root: NodeId) -> Option<Vec<&HistoryEntry>> {
        let pos = self.entries.iter().position(|e| e.root == root)?;
        Some(self.entries.iter().skip(pos + 1).collect())
    }

    /// Finds a historic entry by commit id, for `rollback`.
    pub fn find_by_commit_id(&self, commit_id: u64) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.commit_id == commit_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    fn entry(root: u128, commit_id: u64) -> HistoryEntry {
        HistoryEntry {
            root: NodeId::from_permanent(root),
            commit_id,
            touched: TouchedRangeSummary::new(),
            is_rollback: false,
        }
    }

    #[test]
    fn test_ring_evicts_oldest_past_depth() {
        let mut h = History::new(2);
        h.push(entry(1, 1));
        h.push(entry(2, 2));
        h.push(entry(3, 3));
        assert!(h.find_by_commit_id(1).is_none());
        assert!(h.find_by_commit_id(2).is_some());
        assert!(h.find_by_commit_id(3).is_some());
    }

    #[test]
    fn test_entries_since_excludes_base_itself() {
        let mut h = History::new(DEFAULT_HISTORY_DEPTH);
        h.push(entry(1, 1));
        h.push(entry(2, 2));
        h.push(entry(3, 3));
        let since = h.entries_since(NodeId::from_permanent(1)).unwrap();
        assert_eq!(since.len(), 2);
        assert_eq!(since[0].commit_id, 2);
    }

    #[test]
    fn test_entries_since_unknown_root_is_none() {
        let mut h = History::new(DEFAULT_HISTORY_DEPTH);
        h.push(entry(1, 1));
        assert!(h.entries_since(NodeId::from_permanent(99)).is_none());
    }
}
