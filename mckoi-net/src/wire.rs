// Request framing: length-prefixed binary messages over TCP, MessagePack
// payloads (the grounding repo's `submerge-net` reaches for `rmp`/
// `rmp-serde` for the same reason: small, schema-less, and serde-native).
// Every message bears a 32-byte HMAC-SHA-256 authentication tag over the
// payload, computed and verified with the shared `network_password`
// (spec §6.2). Frame layout on the wire:
//
//   len:  u32 LE            (byte length of `tag || payload`)
//   tag:  [u8; 32]           HMAC-SHA-256(payload)
//   payload: [u8; len - 32]  rmp_serde-encoded `Request` or `Response`

use std::io::{Read, Write};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use mckoi_base::{err_kind, Error, ErrorKind, Result};

use crate::auth::{compute_tag, verify_tag, TAG_LEN};
use crate::key::Key;
use crate::node_id::NodeId;

/// Opaque handle for a block server within the cluster directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockServerId(pub u64);

/// A named mount point (spec §3.5 Path).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathName(pub String);

impl From<&str> for PathName {
    fn from(s: &str) -> Self {
        PathName(s.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    Up,
    Suspect,
    Offline,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitFaultWire {
    BaseTooOld,
    ConcurrentConflict,
    MergeRequired,
    RollbackTooOld,
}

/// Selected opcodes from spec §6.2, one variant per request shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Request {
    Ping,
    BsRead { node_id: NodeId },
    BsWrite { node_id: NodeId, bytes: Vec<u8> },
    BsDelete { node_id: NodeId },
    BsListLocal,
    MsAllocate { count: u32 },
    MsResolve { node_id: NodeId },
    MsAssign { node_id: NodeId, target: BlockServerId },
    MsHeartbeat { block_server: BlockServerId, status: PeerStatus },
    RsBegin { path: PathName },
    RsCommit {
        path: PathName,
        base_root: NodeId,
        proposed_root: NodeId,
        touched_summary: Vec<u8>,
    },
    RsRoot { path: PathName },
    RsRollback { path: PathName, to_commit: u64 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Response {
    Ack,
    Pong,
    Bytes(Vec<u8>),
    NotFound,
    ImmutableConflict,
    Ids(Vec<NodeId>),
    Resolved { replicas: Vec<BlockServerId>, version: u64 },
    Root(NodeId),
    CommitOk(NodeId),
    CommitFault(CommitFaultWire),
    MergeNeeded(NodeId),
    NodeIds(Vec<NodeId>),
    Keys(Vec<Key>),
    Err(String),
}

pub fn write_message<T: Serialize>(w: &mut impl Write, secret: &[u8], msg: &T) -> Result<()> {
    let payload = rmp_serde::to_vec(msg)?;
    let tag = compute_tag(secret, &payload);
    let len = (TAG_LEN + payload.len()) as u32;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&tag)?;
    w.write_all(&payload)?;
    w.flush()?;
    Ok(())
}

pub fn read_message<T: DeserializeOwned>(r: &mut impl Read, secret: &[u8]) -> Result<T> {
    let mut len_buf = [0_u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len < TAG_LEN {
        return Err(err_kind(ErrorKind::Network, "frame shorter than auth tag"));
    }
    let mut body = vec![0_u8; len];
    r.read_exact(&mut body)?;
    let (tag, payload) = body.split_at(TAG_LEN);
    verify_tag(secret, payload, tag)?;
    let msg: T = rmp_serde::from_slice(payload)?;
    Ok(msg)
}

impl From<CommitFaultWire> for mckoi_base::CommitFaultKind {
    fn from(w: CommitFaultWire) -> Self {
        match w {
            CommitFaultWire::BaseTooOld => mckoi_base::CommitFaultKind::BaseTooOld,
            CommitFaultWire::ConcurrentConflict => mckoi_base::CommitFaultKind::ConcurrentConflict,
            CommitFaultWire::MergeRequired => mckoi_base::CommitFaultKind::MergeRequired,
            CommitFaultWire::RollbackTooOld => mckoi_base::CommitFaultKind::RollbackTooOld,
        }
    }
}

impl From<mckoi_base::CommitFaultKind> for CommitFaultWire {
    fn from(k: mckoi_base::CommitFaultKind) -> Self {
        match k {
            mckoi_base::CommitFaultKind::BaseTooOld => CommitFaultWire::BaseTooOld,
            mckoi_base::CommitFaultKind::ConcurrentConflict => CommitFaultWire::ConcurrentConflict,
            mckoi_base::CommitFaultKind::MergeRequired => CommitFaultWire::MergeRequired,
            mckoi_base::CommitFaultKind::RollbackTooOld => CommitFaultWire::RollbackTooOld,
        }
    }
}

/// Convenience conversion so callers can `?` a `Response::Err` into this
/// crate's `Result`, matching the teacher's "blanket `From`" style for
/// wrapping foreign error shapes into a single `Error`.
pub fn response_to_err(msg: String) -> Error {
    err_kind(ErrorKind::Network, msg)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn test_roundtrip_request() {
        let secret = b"hunter2";
        let req = Request::BsRead { node_id: NodeId::from_permanent(7) };
        let mut buf = Vec::new();
        write_message(&mut buf, secret, &req).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: Request = read_message(&mut cursor, secret).unwrap();
        match decoded {
            Request::BsRead { node_id } => assert_eq!(node_id, NodeId::from_permanent(7)),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_rejects_wrong_secret() {
        let req = Request::Ping;
        let mut buf = Vec::new();
        write_message(&mut buf, b"right", &req).unwrap();
        let mut cursor = Cursor::new(buf);
        let res: Result<Request> = read_message(&mut cursor, b"wrong");
        assert!(res.is_err());
    }

    #[test]
    fn test_rejects_truncated_frame() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4_u32.to_le_bytes());
        buf.extend_from_slice(&[0_u8; 2]);
        let mut cursor = Cursor::new(buf);
        let res: Result<Request> = read_message(&mut cursor, b"secret");
        assert!(res.is_err());
    }
}
