// Directory changes are durable before they are acknowledged (spec §4.2:
// "generator bounds persisted before return"). Grounded on the same
// append-log / periodic-snapshot discipline as `mckoi_store::bucket`: a
// length-prefixed log of serialized records, replayed once at startup,
// compacted into a full snapshot when it grows past a threshold
// (SPEC_FULL.md §4.2.1).

use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use mckoi_base::Result;
use mckoi_net::{BlockServerId, NodeId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WalOp {
    /// Persists the id generator's new exclusive upper bound before
    /// `allocate_ids` returns the freshly minted ids to the caller.
    AllocateUpTo { exclusive_upper_bound: u128 },
    /// Appends a replica assignment; assignments are append-only within a
    /// directory version (spec §4.2).
    Assign { node_id: NodeId, target: BlockServerId, version: u64 },
    /// Registers a block server's network address in the directory.
    RegisterServer { block_server_id: BlockServerId, address: String },
}

pub struct Wal {
    log_path: PathBuf,
    snapshot_path: PathBuf,
    file: fs::File,
    bytes_since_snapshot: u64,
}

const SNAPSHOT_THRESHOLD_BYTES: u64 = 1024 * 1024;

impl Wal {
    /// Opens (or creates) the WAL directory, replaying the last snapshot
    /// (if any) followed by any log entries written since, in order.
    pub fn open(dir: impl AsRef<Path>) -> Result<(Self, Option<Vec<u8>>, Vec<WalOp>)> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let log_path = dir.join("manager.wal");
        let snapshot_path = dir.join("manager.snapshot");

        let snapshot = if snapshot_path.exists() {
            Some(fs::read(&snapshot_path)?)
        } else {
            None
        };

        let ops = if log_path.exists() { Self::replay(&log_path)? } else { Vec::new() };

        let file = fs::OpenOptions::new().read(true).write(true).create(true).open(&log_path)?;
        let bytes_since_snapshot = file.metadata()?.len();
        Ok((Wal { log_path, snapshot_path, file, bytes_since_snapshot }, snapshot, ops))
    }

    fn replay(path: &Path) -> Result<Vec<WalOp>> {
        let mut reader = BufReader::new(fs::File::open(path)?);
        let mut ops = Vec::new();
        loop {
            let mut len_buf = [0_u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut buf = vec![0_u8; len];
            if reader.read_exact(&mut buf).is_err() {
                break; // torn trailing write; stop replay here
            }
            match rmp_serde::from_slice(&buf) {
                Ok(op) => ops.push(op),
                Err(_) => break, // torn/corrupt trailing record
            }
        }
        Ok(ops)
    }

    /// Appends and fsyncs a single record.
    pub fn append(&mut self, op: &WalOp) -> Result<()> {
        let payload = rmp_serde::to_vec(op)?;
        self.file.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.file.write_all(&payload)?;
        self.file.sync_all()?;
        self.bytes_since_snapshot += 4 + payload.len() as u64;
        Ok(())
    }

    pub fn should_compact(&self) -> bool {
        self.bytes_since_snapshot >= SNAPSHOT_THRESHOLD_BYTES
    }

    /// Replaces the snapshot with `snapshot_bytes` and truncates the log,
    /// since every op up to this point is now captured in the snapshot.
    pub fn compact(&mut self, snapshot_bytes: &[u8]) -> Result<()> {
        let tmp = self.snapshot_path.with_extension("snapshot.tmp");
        fs::write(&tmp, snapshot_bytes)?;
        fs::rename(&tmp, &self.snapshot_path)?;
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.bytes_since_snapshot = 0;
        let _ = &self.log_path;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_append_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (mut wal, snap, ops) = Wal::open(dir.path()).unwrap();
            assert!(snap.is_none());
            assert!(ops.is_empty());
            wal.append(&WalOp::AllocateUpTo { exclusive_upper_bound: 100 }).unwrap();
            wal.append(&WalOp::RegisterServer {
                block_server_id: BlockServerId(1),
                address: "127.0.0.1:9000".into(),
            })
            .unwrap();
        }
        let (_wal, snap, ops) = Wal::open(dir.path()).unwrap();
        assert!(snap.is_none());
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn test_compact_truncates_log_and_writes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (mut wal, _, _) = Wal::open(dir.path()).unwrap();
        wal.append(&WalOp::AllocateUpTo { exclusive_upper_bound: 10 }).unwrap();
        wal.compact(b"fake-snapshot-bytes").unwrap();
        drop(wal);

        let (_wal, snap, ops) = Wal::open(dir.path()).unwrap();
        assert_eq!(snap.as_deref(), Some(&b"fake-snapshot-bytes"[..]));
        assert!(ops.is_empty());
    }

    #[test]
    fn test_replay_stops_at_torn_trailing_record() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (mut wal, _, _) = Wal::open(dir.path()).unwrap();
            wal.append(&WalOp::AllocateUpTo { exclusive_upper_bound: 1 }).unwrap();
        }
        {
            use std::io::Write as _;
            let log_path = dir.path().join("manager.wal");
            let mut f = fs::OpenOptions::new().append(true).open(&log_path).unwrap();
            f.write_all(&500_u32.to_le_bytes()).unwrap();
            f.write_all(&[1, 2, 3]).unwrap();
        }
        let (_wal, _snap, ops) = Wal::open(dir.path()).unwrap();
        assert_eq!(ops.len(), 1);
    }
}
