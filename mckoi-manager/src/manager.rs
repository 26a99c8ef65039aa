// The directory service proper (spec §4.2). Ties the in-memory `Directory`
// to the durable `Wal` and the `Quorum` replication seam.

use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use mckoi_base::{err_kind, ErrorKind, Result};
use mckoi_net::{BlockServerId, NodeId, PeerStatus};
use tracing::{debug, info};

use crate::directory::Directory;
use crate::quorum::Quorum;
use crate::wal::{Wal, WalOp};

struct State {
    directory: Directory,
    wal: Wal,
}

pub struct ManagerServer {
    state: Mutex<State>,
    quorum: Quorum,
}

impl ManagerServer {
    pub fn open(dir: impl AsRef<Path>, quorum: Quorum) -> Result<Self> {
        let (wal, snapshot, ops) = Wal::open(dir)?;
        let mut directory = match snapshot {
            Some(bytes) => rmp_serde::from_slice(&bytes)?,
            None => Directory::default(),
        };
        for op in &ops {
            directory.apply(op);
        }
        info!(target: "mckoi", nodes = directory.nodes.len(), next_id = directory.next_id, "manager directory loaded");
        Ok(ManagerServer { state: Mutex::new(State { directory, wal }), quorum })
    }

    fn commit(&self, state: &mut State, op: WalOp) -> Result<()> {
        self.quorum.propose(&op)?;
        state.wal.append(&op)?;
        state.directory.apply(&op);
        if state.wal.should_compact() {
            let snapshot = rmp_serde::to_vec(&state.directory)?;
            state.wal.compact(&snapshot)?;
            debug!(target: "mckoi", "manager wal compacted");
        }
        Ok(())
    }

    /// Returns `count` fresh permanent ids from a monotonic generator,
    /// persisting the new exclusive upper bound before returning so a
    /// crash-and-restart manager never reissues an id (spec §4.2).
    pub fn allocate_ids(&self, count: u32) -> Result<Vec<NodeId>> {
        let mut state = self.state.lock().unwrap();
        let start = state.directory.next_id;
        let end = start + count as u128;
        self.commit(&mut state, WalOp::AllocateUpTo { exclusive_upper_bound: end })?;
        Ok((start..end).map(NodeId::from_permanent).collect())
    }

    /// Reads the directory; stale entries are the caller's problem to
    /// detect via `version` and retry after a fresh `resolve` (spec §4.2).
    pub fn resolve(&self, node_id: NodeId) -> Result<(Vec<BlockServerId>, u64)> {
        let state = self.state.lock().unwrap();
        let entry = state
            .directory
            .nodes
            .get(&node_id)
            .ok_or_else(|| err_kind(ErrorKind::NotFound, format!("no directory entry for {node_id:?}")))?;
        Ok((entry.replica_set.iter().copied().collect(), entry.version))
    }

    pub fn assign(&self, node_id: NodeId, target: BlockServerId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let version = state.directory.nodes.get(&node_id).map(|e| e.version).unwrap_or(0) + 1;
        self.commit(&mut state, WalOp::Assign { node_id, target, version })
    }

    pub fn register_server(&self, block_server_id: BlockServerId, address: String) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.commit(&mut state, WalOp::RegisterServer { block_server_id, address })
    }

    /// Marks a block server as having just reported in. Transitions to
    /// `suspect`/`offline` happen on `sweep_liveness`, not here.
    pub fn heartbeat(&self, block_server_id: BlockServerId, _status: PeerStatus) {
        let mut state = self.state.lock().unwrap();
        state.directory.heartbeat(block_server_id, Instant::now());
    }

    pub fn server_status(&self, block_server_id: BlockServerId) -> Option<PeerStatus> {
        let state = self.state.lock().unwrap();
        state.directory.servers.get(&block_server_id).map(|e| e.status)
    }

    /// Recomputes suspect/offline transitions for servers unheard-from for
    /// too long. Intended to be called periodically by the owning process.
    pub fn sweep_liveness(&self) {
        let mut state = self.state.lock().unwrap();
        state.directory.sweep_liveness(Instant::now());
    }
}
