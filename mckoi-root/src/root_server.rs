// The transactional commit engine (spec §4.3): one `RootServer` per path,
// the sole actor that publishes new root node ids for it. Grounded on
// spec §4.3.1–§4.3.5 directly; the teacher's own `submerge-txn` models a
// different protocol entirely (a simplified OceanVista multi-node replica
// protocol with a dangling, never-implemented `paxos` module) and offers
// no usable precedent here, so this is built fresh against the spec, in
// the same plain-state-machine style the rest of the workspace uses.

use std::collections::HashMap;
use std::sync::Mutex;

use mckoi_base::{err_kind, CommitFaultKind, ErrorKind, Overlap, Result, TouchedRangeSummary};
use mckoi_net::{NodeId, PathName};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::history::{History, HistoryEntry, DEFAULT_HISTORY_DEPTH};
use crate::transaction_cache::{TransactionCache, DEFAULT_BUDGET_BYTES};

/// A snapshot handle returned by `begin_transaction` (spec §4.3.1). No lock
/// is held beyond the read that produced it.
#[derive(Clone, Copy, Debug)]
pub struct TxHandle {
    pub base_root: NodeId,
    /// The commit id `base_root` was produced by, when the path's
    /// transaction cache still holds that commit's encoded outcome. `None`
    /// for a genesis root or once the cache has evicted it under budget
    /// pressure — purely informational, the commit protocol itself only
    /// ever keys off `base_root`.
    pub base_commit_id: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitOutcome {
    Committed { new_root: NodeId, commit_id: u64 },
    Fault(CommitFaultKind),
}

struct PathState {
    current_root: NodeId,
    history: History,
    cache: TransactionCache,
}

pub struct RootServer {
    paths: Mutex<HashMap<PathName, PathState>>,
    history_depth: usize,
    cache_budget_bytes: u64,
}

impl RootServer {
    pub fn new() -> Self {
        RootServer {
            paths: Mutex::new(HashMap::new()),
            history_depth: DEFAULT_HISTORY_DEPTH,
            cache_budget_bytes: DEFAULT_BUDGET_BYTES,
        }
    }

    pub fn with_config(history_depth: usize, cache_budget_bytes: u64) -> Self {
        RootServer {
            paths: Mutex::new(HashMap::new()),
            history_depth,
            cache_budget_bytes,
        }
    }

    /// Creates a path with an empty initial root, if it doesn't exist yet.
    /// Seeds the history ring with a genesis entry for `initial_root`
    /// (commit id 0) so the very first pair of concurrent transactions —
    /// both opened before any real commit, hence both based on
    /// `initial_root` — can still be classified by `entries_since` instead
    /// of wrongly falling off the front as `BaseTooOld`.
    pub fn ensure_path(&self, path: &PathName, initial_root: NodeId) {
        let mut paths = self.paths.lock().unwrap();
        paths.entry(path.clone()).or_insert_with(|| {
            let mut history = History::new(self.history_depth);
            history.push(HistoryEntry {
                root: initial_root,
                commit_id: 0,
                touched: TouchedRangeSummary::new(),
                is_rollback: false,
            });
            PathState {
                current_root: initial_root,
                history,
                cache: TransactionCache::new(self.cache_budget_bytes),
            }
        });
    }

    pub fn current_root(&self, path: &PathName) -> Result<NodeId> {
        let paths = self.paths.lock().unwrap();
        paths
            .get(path)
            .map(|p| p.current_root)
            .ok_or_else(|| err_kind(ErrorKind::NotFound, format!("no such path {}", path.0)))
    }

    pub fn begin_transaction(&self, path: &PathName) -> Result<TxHandle> {
        let mut paths = self.paths.lock().unwrap();
        let state = paths
            .get_mut(path)
            .ok_or_else(|| err_kind(ErrorKind::NotFound, format!("no such path {}", path.0)))?;
        let base_root = state.current_root;
        let base_commit_id = state
            .cache
            .get(base_root)
            .and_then(|bytes| rmp_serde::from_slice::<CommitOutcome>(bytes).ok())
            .and_then(|outcome| match outcome {
                CommitOutcome::Committed { commit_id, .. } => Some(commit_id),
                CommitOutcome::Fault(_) => None,
            });
        Ok(TxHandle { base_root, base_commit_id })
    }

    /// Implements spec §4.3.2's commit protocol. `touched_ranges` describes
    /// the keys this transaction read/wrote; on a non-fast-path commit
    /// whose overlap with intervening history is free of hard conflicts,
    /// returns `Fault(MergeRequired)` rather than doing the actual B+tree
    /// merge itself — per the spec, the merge is the client's job, driven
    /// by a retry against the now-current root.
    ///
    /// A commit that lands but whose response is lost in transit (the
    /// client times out and resubmits the exact same `proposed_root`)
    /// would otherwise be reclassified against a `current_root` that has
    /// already moved past it. The path's transaction cache remembers the
    /// outcome of every successful commit, keyed by the root it produced,
    /// so a retried commit replays that same outcome instead.
    pub fn commit(
        &self,
        path: &PathName,
        tx: TxHandle,
        proposed_root: NodeId,
        touched_ranges: TouchedRangeSummary,
    ) -> Result<CommitOutcome> {
        let mut paths = self.paths.lock().unwrap();
        let state = paths
            .get_mut(path)
            .ok_or_else(|| err_kind(ErrorKind::NotFound, format!("no such path {}", path.0)))?;

        let replayed = state
            .cache
            .get(proposed_root)
            .and_then(|bytes| rmp_serde::from_slice::<CommitOutcome>(bytes).ok());
        if let Some(outcome) = replayed {
            info!("replaying cached outcome for a retried commit");
            return Ok(outcome);
        }

        if tx.base_root == state.current_root {
            let commit_id = state.history.latest_commit_id() + 1;
            state.current_root = proposed_root;
            state.history.push(HistoryEntry {
                root: proposed_root,
                commit_id,
                touched: touched_ranges,
                is_rollback: false,
            });
            let outcome = CommitOutcome::Committed { new_root: proposed_root, commit_id };
            if let Ok(bytes) = rmp_serde::to_vec(&outcome) {
                state.cache.put(proposed_root, bytes);
            }
            info!(commit_id, "fast-path commit accepted");
            return Ok(outcome);
        }

        let Some(since) = state.history.entries_since(tx.base_root) else {
            warn!("commit base root aged out of history ring");
            return Ok(CommitOutcome::Fault(CommitFaultKind::BaseTooOld));
        };

        for historic in &since {
            if touched_ranges.classify(&historic.touched) == Overlap::Hard {
                warn!(conflicting_commit_id = historic.commit_id, "hard conflict detected");
                return Ok(CommitOutcome::Fault(CommitFaultKind::ConcurrentConflict));
            }
        }

        // No hard conflict: either disjoint or softly overlapping with
        // every intervening commit. The client must rebase its proposed
        // root against `current_root` and resubmit (spec §4.3.2 step 5).
        Ok(CommitOutcome::Fault(CommitFaultKind::MergeRequired))
    }

    /// `mckoi-admin rollback --path NAME --to COMMIT_ID` (SPEC_FULL.md
    /// §4.3.5): rewinds `current_root` to a prior commit still held in the
    /// ring, and records the rewind as a new, forward-moving history entry
    /// so subsequent commits remain a total order.
    pub fn rollback(&self, path: &PathName, to_commit_id: u64) -> Result<NodeId> {
        let mut paths = self.paths.lock().unwrap();
        let state = paths
            .get_mut(path)
            .ok_or_else(|| err_kind(ErrorKind::NotFound, format!("no such path {}", path.0)))?;
        let Some(target) = state.history.find_by_commit_id(to_commit_id) else {
            return Err(err_kind(
                ErrorKind::CommitFault(CommitFaultKind::RollbackTooOld),
                format!("commit {to_commit_id} is no longer in the retained history"),
            ));
        };
        let root = target.root;
        let commit_id = state.history.latest_commit_id() + 1;
        state.current_root = root;
        state.history.push(HistoryEntry {
            root,
            commit_id,
            touched: TouchedRangeSummary::new(),
            is_rollback: true,
        });
        info!(to_commit_id, new_commit_id = commit_id, "path rolled back");
        Ok(root)
    }

    pub fn cache_get(&self, path: &PathName, root: NodeId) -> Option<Vec<u8>> {
        let mut paths = self.paths.lock().unwrap();
        paths.get_mut(path).and_then(|p| p.cache.get(root)).map(|b| b.to_vec())
    }

    pub fn cache_put(&self, path: &PathName, root: NodeId, bytes: Vec<u8>) {
        if let Some(state) = self.paths.lock().unwrap().get_mut(path) {
            state.cache.put(root, bytes);
        }
    }
}

impl Default for RootServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    fn path() -> PathName {
        PathName::from("/accounts")
    }

    #[test]
    fn test_fast_path_commit_advances_root() {
        let server = RootServer::new();
        server.ensure_path(&path(), NodeId::from_permanent(0));
        let tx = server.begin_transaction(&path()).unwrap();
        let outcome =
            server.commit(&path(), tx, NodeId::from_permanent(1), TouchedRangeSummary::new()).unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Committed { new_root: NodeId::from_permanent(1), commit_id: 1 }
        );
        assert_eq!(server.current_root(&path()).unwrap(), NodeId::from_permanent(1));
    }

    #[test]
    fn test_retried_commit_replays_cached_outcome() {
        let server = RootServer::new();
        server.ensure_path(&path(), NodeId::from_permanent(0));
        let tx = server.begin_transaction(&path()).unwrap();
        assert_eq!(tx.base_commit_id, None);

        let first =
            server.commit(&path(), tx, NodeId::from_permanent(1), TouchedRangeSummary::new()).unwrap();
        assert_eq!(
            first,
            CommitOutcome::Committed { new_root: NodeId::from_permanent(1), commit_id: 1 }
        );

        // Same (tx, proposed_root) resubmitted, as a client would after a
        // dropped response; must replay the same outcome rather than being
        // misclassified against the root it already advanced past.
        let retried =
            server.commit(&path(), tx, NodeId::from_permanent(1), TouchedRangeSummary::new()).unwrap();
        assert_eq!(retried, first);
        assert_eq!(server.current_root(&path()).unwrap(), NodeId::from_permanent(1));

        // A transaction now beginning against the committed root sees its
        // commit id surface from the cache.
        let tx2 = server.begin_transaction(&path()).unwrap();
        assert_eq!(tx2.base_commit_id, Some(1));
    }

    #[test]
    fn test_concurrent_hard_conflict_is_commit_fault() {
        let server = RootServer::new();
        server.ensure_path(&path(), NodeId::from_permanent(0));
        let tx1 = server.begin_transaction(&path()).unwrap();
        let tx2 = server.begin_transaction(&path()).unwrap();

        let mut touched1 = TouchedRangeSummary::new();
        touched1.touch_unique(42);
        server.commit(&path(), tx1, NodeId::from_permanent(1), touched1).unwrap();

        let mut touched2 = TouchedRangeSummary::new();
        touched2.touch_unique(42);
        let outcome = server.commit(&path(), tx2, NodeId::from_permanent(2), touched2).unwrap();
        assert_eq!(outcome, CommitOutcome::Fault(CommitFaultKind::ConcurrentConflict));
    }

    #[test]
    fn test_disjoint_concurrent_commit_needs_merge() {
        let server = RootServer::new();
        server.ensure_path(&path(), NodeId::from_permanent(0));
        let tx1 = server.begin_transaction(&path()).unwrap();
        let tx2 = server.begin_transaction(&path()).unwrap();

        let mut touched1 = TouchedRangeSummary::new();
        touched1.touch_key(1);
        server.commit(&path(), tx1, NodeId::from_permanent(1), touched1).unwrap();

        let mut touched2 = TouchedRangeSummary::new();
        touched2.touch_key(2);
        let outcome = server.commit(&path(), tx2, NodeId::from_permanent(2), touched2).unwrap();
        assert_eq!(outcome, CommitOutcome::Fault(CommitFaultKind::MergeRequired));

        // Client rebases against the now-current root and resubmits; this
        // time it's the fast path.
        let rebased_tx = TxHandle { base_root: server.current_root(&path()).unwrap(), base_commit_id: None };
        let outcome2 =
            server.commit(&path(), rebased_tx, NodeId::from_permanent(3), TouchedRangeSummary::new()).unwrap();
        assert!(matches!(outcome2, CommitOutcome::Committed { .. }));
    }

    #[test]
    fn test_base_too_old_when_aged_out_of_ring() {
        let server = RootServer::with_config(1, DEFAULT_BUDGET_BYTES);
        server.ensure_path(&path(), NodeId::from_permanent(0));
        let stale_tx = server.begin_transaction(&path()).unwrap();
        server.commit(&path(), stale_tx, NodeId::from_permanent(1), TouchedRangeSummary::new()).unwrap();
        // Evicts the entry whose root == stale_tx.base_root from a
        // depth-1 ring.
        let tx2 = TxHandle { base_root: NodeId::from_permanent(1), base_commit_id: None };
        server.commit(&path(), tx2, NodeId::from_permanent(2), TouchedRangeSummary::new()).unwrap();

        let outcome =
            server.commit(&path(), stale_tx, NodeId::from_permanent(99), TouchedRangeSummary::new()).unwrap();
        assert_eq!(outcome, CommitOutcome::Fault(CommitFaultKind::BaseTooOld));
    }

    #[test]
    fn test_rollback_restores_prior_root() {
        let server = RootServer::new();
        server.ensure_path(&path(), NodeId::from_permanent(0));
        let tx = server.begin_transaction(&path()).unwrap();
        server.commit(&path(), tx, NodeId::from_permanent(1), TouchedRangeSummary::new()).unwrap();
        let tx2 = server.begin_transaction(&path()).unwrap();
        server.commit(&path(), tx2, NodeId::from_permanent(2), TouchedRangeSummary::new()).unwrap();

        let restored = server.rollback(&path(), 1).unwrap();
        assert_eq!(restored, NodeId::from_permanent(1));
        assert_eq!(server.current_root(&path()).unwrap(), NodeId::from_permanent(1));
    }

    #[test]
    fn test_rollback_past_retained_ring_is_rollback_too_old() {
        let server = RootServer::with_config(1, DEFAULT_BUDGET_BYTES);
        server.ensure_path(&path(), NodeId::from_permanent(0));
        let tx = server.begin_transaction(&path()).unwrap();
        server.commit(&path(), tx, NodeId::from_permanent(1), TouchedRangeSummary::new()).unwrap();
        let tx2 = TxHandle { base_root: NodeId::from_permanent(1), base_commit_id: None };
        server.commit(&path(), tx2, NodeId::from_permanent(2), TouchedRangeSummary::new()).unwrap();

        let err = server.rollback(&path(), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommitFault(CommitFaultKind::RollbackTooOld));
    }
}
