use serde::{Deserialize, Serialize};
use std::fmt;

/// A node id is a 128-bit value; the high bit distinguishes *permanent*
/// (server-backed, assigned by a manager) from *temporary* (heap-local,
/// pre-flush, assigned by a client) ids. Temporary ids never reach a block
/// server: by commit time every reachable id under the proposed root has
/// been flushed and rewritten to a permanent id (spec §4.4.4).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(u128);

const TEMP_BIT: u128 = 1_u128 << 127;

impl NodeId {
    pub fn from_permanent(value: u128) -> Self {
        debug_assert_eq!(value & TEMP_BIT, 0, "permanent id must not set the high bit");
        NodeId(value & !TEMP_BIT)
    }

    pub fn from_temporary(counter: u64) -> Self {
        NodeId(TEMP_BIT | counter as u128)
    }

    /// Reconstructs a `NodeId` from a raw 128-bit value that already
    /// encodes the temporary/permanent bit, e.g. one round-tripped through
    /// a serialized index entry.
    pub fn from_raw(value: u128) -> Self {
        NodeId(value)
    }

    pub fn is_temporary(&self) -> bool {
        self.0 & TEMP_BIT != 0
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_temporary()
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }

    /// Stable hash used to pick a block server's bucket file for this id.
    pub fn bucket_hash(&self) -> u64 {
        rapidhash::rapidhash(&self.0.to_le_bytes())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_temporary() {
            write!(f, "NodeId(temp:{:#x})", self.0 & !TEMP_BIT)
        } else {
            write!(f, "NodeId(perm:{:#x})", self.0)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
