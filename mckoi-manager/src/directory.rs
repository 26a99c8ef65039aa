// Directory service state (spec §4.2): `node_id -> {replica_set, version}`
// and `block_server_id -> {address, status, last_seen}`. `status`/
// `last_seen` are liveness facts, recomputed from heartbeats rather than
// persisted — only the replica assignments and the id generator bound
// survive a restart (see `wal::WalOp`).

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use mckoi_net::{BlockServerId, NodeId, PeerStatus};
use serde::{Deserialize, Serialize};

use crate::wal::WalOp;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeEntry {
    pub replica_set: BTreeSet<BlockServerId>,
    pub version: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerEntry {
    pub address: String,
    #[serde(skip, default = "default_status")]
    pub status: PeerStatus,
    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

fn default_status() -> PeerStatus {
    PeerStatus::Suspect
}

/// Default grace period before an unheard-from server is marked `suspect`
/// (spec §4.2: "unheard from for more than the grace period").
pub const DEFAULT_SUSPECT_GRACE: Duration = Duration::from_secs(30);
/// A server still unheard from after a second, longer window is `offline`.
pub const DEFAULT_OFFLINE_GRACE: Duration = Duration::from_secs(120);

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Directory {
    pub nodes: HashMap<NodeId, NodeEntry>,
    pub servers: HashMap<BlockServerId, ServerEntry>,
    pub next_id: u128,
}

impl Directory {
    pub fn apply(&mut self, op: &WalOp) {
        match op {
            WalOp::AllocateUpTo { exclusive_upper_bound } => {
                self.next_id = self.next_id.max(*exclusive_upper_bound);
            }
            WalOp::Assign { node_id, target, version } => {
                let entry = self.nodes.entry(*node_id).or_default();
                entry.replica_set.insert(*target);
                entry.version = entry.version.max(*version);
            }
            WalOp::RegisterServer { block_server_id, address } => {
                self.servers
                    .entry(*block_server_id)
                    .and_modify(|e| e.address = address.clone())
                    .or_insert_with(|| ServerEntry {
                        address: address.clone(),
                        status: PeerStatus::Suspect,
                        last_seen: None,
                    });
            }
        }
    }

    pub fn heartbeat(&mut self, block_server_id: BlockServerId, at: Instant) {
        let entry = self.servers.entry(block_server_id).or_insert_with(|| ServerEntry {
            address: String::new(),
            status: PeerStatus::Suspect,
            last_seen: None,
        });
        entry.last_seen = Some(at);
        entry.status = PeerStatus::Up;
    }

    /// Recomputes suspect/offline transitions for servers unheard-from
    /// relative to `now`. Called periodically by the owning `ManagerServer`.
    pub fn sweep_liveness(&mut self, now: Instant) {
        for entry in self.servers.values_mut() {
            let age = match entry.last_seen {
                Some(last) => now.saturating_duration_since(last),
                None => Duration::MAX,
            };
            entry.status = if age >= DEFAULT_OFFLINE_GRACE {
                PeerStatus::Offline
            } else if age >= DEFAULT_SUSPECT_GRACE {
                PeerStatus::Suspect
            } else {
                PeerStatus::Up
            };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_apply_assign_accumulates_replica_set() {
        let mut dir = Directory::default();
        let node = NodeId::from_permanent(1);
        dir.apply(&WalOp::Assign { node_id: node, target: BlockServerId(1), version: 1 });
        dir.apply(&WalOp::Assign { node_id: node, target: BlockServerId(2), version: 1 });
        let entry = dir.nodes.get(&node).unwrap();
        assert_eq!(entry.replica_set.len(), 2);
        assert_eq!(entry.version, 1);
    }

    #[test]
    fn test_allocate_up_to_is_monotonic() {
        let mut dir = Directory::default();
        dir.apply(&WalOp::AllocateUpTo { exclusive_upper_bound: 50 });
        dir.apply(&WalOp::AllocateUpTo { exclusive_upper_bound: 30 });
        assert_eq!(dir.next_id, 50);
    }

    #[test]
    fn test_sweep_liveness_transitions() {
        let mut dir = Directory::default();
        let id = BlockServerId(1);
        dir.heartbeat(id, Instant::now());
        dir.sweep_liveness(Instant::now());
        assert_eq!(dir.servers[&id].status, PeerStatus::Up);

        let stale = Instant::now() - Duration::from_secs(200);
        dir.servers.get_mut(&id).unwrap().last_seen = Some(stale);
        dir.sweep_liveness(Instant::now());
        assert_eq!(dir.servers[&id].status, PeerStatus::Offline);
    }
}
