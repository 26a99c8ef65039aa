// The client-side half of the wire protocol (spec §6.2): turns manager,
// root, and block server calls into typed results, including the replica
// failover a read needs to satisfy scenario S5 ("kill one replica, reads
// keep working").

use std::collections::HashSet;
use std::sync::Arc;

use mckoi_base::{err_kind, Error, ErrorKind, Result};
use mckoi_net::{response_to_err, BlockServerId, NodeId, PathName, Request, Response};
use mckoi_root::CommitOutcome;
use tracing::warn;

use crate::channel::Channel;

/// Every block server this client knows about, keyed by the id the
/// manager uses to name it in a replica set.
#[derive(Clone)]
pub struct ClusterClient {
    manager: Arc<dyn Channel>,
    root: Arc<dyn Channel>,
    blocks: Vec<(BlockServerId, Arc<dyn Channel>)>,
}

impl ClusterClient {
    pub fn new(
        manager: Arc<dyn Channel>,
        root: Arc<dyn Channel>,
        blocks: Vec<(BlockServerId, Arc<dyn Channel>)>,
    ) -> Self {
        ClusterClient { manager, root, blocks }
    }

    fn block_channel(&self, id: BlockServerId) -> Result<&Arc<dyn Channel>> {
        self.blocks
            .iter()
            .find(|(bid, _)| *bid == id)
            .map(|(_, ch)| ch)
            .ok_or_else(|| err_kind(ErrorKind::Network, format!("unknown block server {id:?}")))
    }

    pub fn allocate_ids(&self, count: u32) -> Result<Vec<NodeId>> {
        match self.manager.call(Request::MsAllocate { count })? {
            Response::Ids(ids) => Ok(ids),
            Response::Err(msg) => Err(response_to_err(msg)),
            other => Err(unexpected(other)),
        }
    }

    pub fn resolve(&self, node_id: NodeId) -> Result<(Vec<BlockServerId>, u64)> {
        match self.manager.call(Request::MsResolve { node_id })? {
            Response::Resolved { replicas, version } => Ok((replicas, version)),
            Response::NotFound => Err(err_kind(ErrorKind::NotFound, format!("no directory entry for {node_id}"))),
            Response::Err(msg) => Err(response_to_err(msg)),
            other => Err(unexpected(other)),
        }
    }

    pub fn assign(&self, node_id: NodeId, target: BlockServerId) -> Result<()> {
        match self.manager.call(Request::MsAssign { node_id, target })? {
            Response::Ack => Ok(()),
            Response::Err(msg) => Err(response_to_err(msg)),
            other => Err(unexpected(other)),
        }
    }

    /// Writes a node to every block server it's assigned to in the
    /// directory. Callers that are creating a new node should `assign` it
    /// to every replica in `replica_set` first.
    pub fn write_to(&self, target: BlockServerId, node_id: NodeId, bytes: Vec<u8>) -> Result<()> {
        let channel = self.block_channel(target)?;
        match channel.call(Request::BsWrite { node_id, bytes })? {
            Response::Ack => Ok(()),
            Response::ImmutableConflict => {
                Err(err_kind(ErrorKind::ImmutableConflict, format!("{node_id} already has different bytes")))
            }
            Response::Err(msg) => Err(response_to_err(msg)),
            other => Err(unexpected(other)),
        }
    }

    pub fn delete_from(&self, target: BlockServerId, node_id: NodeId) -> Result<()> {
        let channel = self.block_channel(target)?;
        match channel.call(Request::BsDelete { node_id })? {
            Response::Ack => Ok(()),
            Response::Err(msg) => Err(response_to_err(msg)),
            other => Err(unexpected(other)),
        }
    }

    /// Reads by trying each replica in the order the manager returned them;
    /// a replica that errors (down, torn, whatever) is skipped rather than
    /// failing the read, satisfying S5.
    pub fn read_with_failover(&self, node_id: NodeId) -> Result<Vec<u8>> {
        let (replicas, _version) = self.resolve(node_id)?;
        let mut last_err: Option<Error> = None;
        for replica in replicas {
            let channel = match self.block_channel(replica) {
                Ok(c) => c,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };
            match channel.call(Request::BsRead { node_id }) {
                Ok(Response::Bytes(bytes)) => return Ok(bytes),
                Ok(Response::NotFound) => {
                    last_err = Some(err_kind(ErrorKind::NotFound, format!("{node_id} not on replica {replica:?}")));
                }
                Ok(Response::Err(msg)) => {
                    warn!(target: "mckoi", %replica, error = %msg, "replica read failed, trying next");
                    last_err = Some(response_to_err(msg));
                }
                Ok(other) => last_err = Some(unexpected(other)),
                Err(e) => {
                    warn!(target: "mckoi", ?replica, error = %e, "replica unreachable, trying next");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| err_kind(ErrorKind::NotFound, format!("no replicas hold {node_id}"))))
    }

    pub fn list_known_ids(&self) -> Result<Vec<NodeId>> {
        let mut ids = HashSet::new();
        for (_, channel) in &self.blocks {
            match channel.call(Request::BsListLocal)? {
                Response::NodeIds(local) => ids.extend(local),
                Response::Err(msg) => return Err(response_to_err(msg)),
                other => return Err(unexpected(other)),
            }
        }
        Ok(ids.into_iter().collect())
    }

    pub fn replica_ids(&self) -> Vec<BlockServerId> {
        self.blocks.iter().map(|(id, _)| *id).collect()
    }

    pub fn rs_begin(&self, path: &PathName) -> Result<NodeId> {
        match self.root.call(Request::RsBegin { path: path.clone() })? {
            Response::Root(root) => Ok(root),
            Response::NotFound => Err(err_kind(ErrorKind::NotFound, format!("no such path {}", path.0))),
            Response::Err(msg) => Err(response_to_err(msg)),
            other => Err(unexpected(other)),
        }
    }

    pub fn rs_root(&self, path: &PathName) -> Result<NodeId> {
        match self.root.call(Request::RsRoot { path: path.clone() })? {
            Response::Root(root) => Ok(root),
            Response::NotFound => Err(err_kind(ErrorKind::NotFound, format!("no such path {}", path.0))),
            Response::Err(msg) => Err(response_to_err(msg)),
            other => Err(unexpected(other)),
        }
    }

    pub fn rs_commit(
        &self,
        path: &PathName,
        base_root: NodeId,
        proposed_root: NodeId,
        touched_summary: Vec<u8>,
    ) -> Result<CommitOutcome> {
        let req =
            Request::RsCommit { path: path.clone(), base_root, proposed_root, touched_summary };
        match self.root.call(req)? {
            Response::CommitOk(new_root) => {
                Ok(CommitOutcome::Committed { new_root, commit_id: 0 })
            }
            Response::CommitFault(kind) => Ok(CommitOutcome::Fault(kind.into())),
            Response::MergeNeeded(_current) => {
                Ok(CommitOutcome::Fault(mckoi_base::CommitFaultKind::MergeRequired))
            }
            Response::Err(msg) => Err(response_to_err(msg)),
            other => Err(unexpected(other)),
        }
    }

    pub fn rs_rollback(&self, path: &PathName, to_commit: u64) -> Result<NodeId> {
        match self.root.call(Request::RsRollback { path: path.clone(), to_commit })? {
            Response::Root(root) => Ok(root),
            Response::CommitFault(kind) => Err(err_kind(
                ErrorKind::CommitFault(kind.into()),
                format!("rollback to commit {to_commit} rejected"),
            )),
            Response::NotFound => Err(err_kind(ErrorKind::NotFound, format!("no such path {}", path.0))),
            Response::Err(msg) => Err(response_to_err(msg)),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(resp: Response) -> Error {
    err_kind(ErrorKind::Internal, format!("unexpected response {resp:?}"))
}
