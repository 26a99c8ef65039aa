// Multi-manager replication (spec §4.2): "a small consensus footprint — a
// single-shot, monotonic-log replication — not a full Paxos/Raft." A write
// commits once a strict majority of managers (this one included) have
// durably applied it. `PeerLink` is the seam the in-process harness and a
// real network transport both implement; this crate only needs the
// majority-counting logic.

use mckoi_base::{err_kind, ErrorKind, Result};

use crate::wal::WalOp;

/// One other manager's replication channel, from this manager's point of
/// view. A failed `replicate` is treated as a (retryable) missed ack, not a
/// fatal error — the caller just won't count that peer towards the quorum.
pub trait PeerLink: Send + Sync {
    fn replicate(&self, op: &WalOp) -> Result<()>;
}

pub struct Quorum {
    peers: Vec<Box<dyn PeerLink>>,
}

impl Quorum {
    pub fn new(peers: Vec<Box<dyn PeerLink>>) -> Self {
        Quorum { peers }
    }

    pub fn single() -> Self {
        Quorum { peers: Vec::new() }
    }

    fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    fn majority(&self) -> usize {
        self.cluster_size() / 2 + 1
    }

    /// Replicates `op` to every configured peer and reports whether a
    /// strict majority (including this manager) acknowledged it. Does not
    /// itself apply the op locally — the caller applies only on success.
    pub fn propose(&self, op: &WalOp) -> Result<()> {
        let mut acks = 1; // this manager, once it durably appends locally
        for peer in &self.peers {
            if peer.replicate(op).is_ok() {
                acks += 1;
            }
        }
        if acks >= self.majority() {
            Ok(())
        } else {
            Err(err_kind(
                ErrorKind::Network,
                format!("quorum not reached: {acks}/{} acks, need {}", self.cluster_size(), self.majority()),
            ))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{Arc, Mutex};
    use test_log::test;

    struct LoopbackPeer {
        applied: Arc<Mutex<Vec<WalOp>>>,
        fail: bool,
    }

    impl PeerLink for LoopbackPeer {
        fn replicate(&self, op: &WalOp) -> Result<()> {
            if self.fail {
                return Err(err_kind(ErrorKind::Network, "peer unreachable"));
            }
            self.applied.lock().unwrap().push(op.clone());
            Ok(())
        }
    }

    #[test]
    fn test_single_manager_always_commits() {
        let q = Quorum::single();
        assert!(q.propose(&WalOp::AllocateUpTo { exclusive_upper_bound: 1 }).is_ok());
    }

    #[test]
    fn test_three_managers_commit_with_one_peer_ack() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let peers: Vec<Box<dyn PeerLink>> = vec![
            Box::new(LoopbackPeer { applied: applied.clone(), fail: false }),
            Box::new(LoopbackPeer { applied: applied.clone(), fail: true }),
        ];
        let q = Quorum::new(peers);
        assert!(q.propose(&WalOp::AllocateUpTo { exclusive_upper_bound: 1 }).is_ok());
        assert_eq!(applied.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_three_managers_fail_without_majority() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let peers: Vec<Box<dyn PeerLink>> = vec![
            Box::new(LoopbackPeer { applied: applied.clone(), fail: true }),
            Box::new(LoopbackPeer { applied: applied.clone(), fail: true }),
        ];
        let q = Quorum::new(peers);
        assert!(q.propose(&WalOp::AllocateUpTo { exclusive_upper_bound: 1 }).is_err());
    }
}
