// A block server owns a directory of bucket files and dispatches each
// node id to one of them by hash (spec §4.1, SPEC_FULL.md §4.1.1). It is
// the storage half of a block server process; the networked half lives
// in `mckoi`'s harness, which speaks `mckoi_net::wire` on top of this.

use std::fs;
use std::path::{Path, PathBuf};

use mckoi_base::{err_kind, ErrorKind, Result};
use mckoi_net::NodeId;
use tracing::{info, warn};

use crate::bucket::Bucket;

const DEFAULT_BUCKET_COUNT: u32 = 64;
const DIRTY_SENTINEL: &str = ".dirty";

pub struct BlockServer {
    dir: PathBuf,
    buckets: Vec<Bucket>,
}

impl BlockServer {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_bucket_count(dir, DEFAULT_BUCKET_COUNT)
    }

    pub fn open_with_bucket_count(dir: impl AsRef<Path>, bucket_count: u32) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let sentinel = dir.join(DIRTY_SENTINEL);
        let unclean = sentinel.exists();
        if unclean {
            warn!(target: "mckoi", dir = %dir.display(), "unclean shutdown sentinel present, repairing buckets");
        }
        fs::write(&sentinel, b"")?;

        let mut buckets = Vec::with_capacity(bucket_count as usize);
        for i in 0..bucket_count {
            let path = dir.join(format!("bucket-{i:04}.dat"));
            buckets.push(Bucket::open(path)?);
        }
        info!(target: "mckoi", dir = %dir.display(), bucket_count, "block server opened");
        Ok(BlockServer { dir, buckets })
    }

    fn bucket_index(&self, node_id: NodeId) -> usize {
        (node_id.bucket_hash() % self.buckets.len() as u64) as usize
    }

    pub fn write(&mut self, node_id: NodeId, bytes: &[u8]) -> Result<()> {
        let idx = self.bucket_index(node_id);
        self.buckets[idx].write(node_id, bytes)
    }

    pub fn read(&mut self, node_id: NodeId) -> Result<Vec<u8>> {
        let idx = self.bucket_index(node_id);
        self.buckets[idx]
            .read(node_id)?
            .ok_or_else(|| err_kind(ErrorKind::NotFound, format!("no such node id {node_id:?}")))
    }

    pub fn delete(&mut self, node_id: NodeId) -> Result<()> {
        let idx = self.bucket_index(node_id);
        self.buckets[idx].delete(node_id)
    }

    /// Diagnostic: all locally-held ids in ascending order (spec §4.1).
    pub fn list_local(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.buckets.iter().flat_map(|b| b.ids()).collect();
        ids.sort();
        ids
    }

    /// Marks a clean shutdown by removing the `.dirty` sentinel. Must be
    /// called after all pending writes have been fsync'd.
    pub fn close(self) -> Result<()> {
        let sentinel = self.dir.join(DIRTY_SENTINEL);
        if sentinel.exists() {
            fs::remove_file(&sentinel)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_write_read_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = BlockServer::open_with_bucket_count(dir.path(), 4).unwrap();
        let id = NodeId::from_permanent(7);
        server.write(id, b"payload").unwrap();
        assert_eq!(server.read(id).unwrap(), b"payload");
        server.delete(id).unwrap();
        let err = server.read(id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_list_local_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = BlockServer::open_with_bucket_count(dir.path(), 4).unwrap();
        for v in [30_u128, 10, 20] {
            server.write(NodeId::from_permanent(v), b"x").unwrap();
        }
        let ids: Vec<u128> = server.list_local().iter().map(|id| id.as_u128()).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[test]
    fn test_conflicting_write_is_immutable_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = BlockServer::open_with_bucket_count(dir.path(), 4).unwrap();
        let id = NodeId::from_permanent(1);
        server.write(id, b"a").unwrap();
        let err = server.write(id, b"b").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImmutableConflict);
    }

    #[test]
    fn test_reopen_after_clean_close_has_no_dirty_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let server = BlockServer::open_with_bucket_count(dir.path(), 4).unwrap();
        server.close().unwrap();
        assert!(!dir.path().join(DIRTY_SENTINEL).exists());
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut server = BlockServer::open_with_bucket_count(dir.path(), 4).unwrap();
            server.write(NodeId::from_permanent(5), b"hi").unwrap();
            server.close().unwrap();
        }
        let mut server = BlockServer::open_with_bucket_count(dir.path(), 4).unwrap();
        assert_eq!(server.read(NodeId::from_permanent(5)).unwrap(), b"hi");
    }
}
