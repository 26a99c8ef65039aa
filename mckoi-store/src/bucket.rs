// Each block server directory holds `N` bucket files, each an append-only
// log of records:
//
//   node_id: u128 LE | len: u32 LE | payload: [u8; len] | sha256(payload): [u8; 32]
//
// A zero-length payload is a delete tombstone. On startup a bucket is
// scanned once to rebuild an in-memory index; a record whose checksum
// fails to verify, or whose declared length runs past EOF, marks the
// file torn and the server truncates to the last verified record
// boundary (SPEC_FULL.md §4.1.1).

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use mckoi_base::{err_kind, ErrorKind, Result};
use mckoi_net::NodeId;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::ioutil::{FileReader, FileWriter, Writer};

const HASH_LEN: usize = 32;

#[derive(Clone, Copy)]
struct IndexEntry {
    offset: u64,
    len: u32,
}

pub struct Bucket {
    writer: FileWriter,
    reader: FileReader,
    index: HashMap<NodeId, IndexEntry>,
    end_offset: u64,
}

fn record_header_len() -> usize {
    16 /* node id */ + 4 /* len */
}

impl Bucket {
    /// Opens (creating if absent) a bucket file and replays it to rebuild
    /// the in-memory index, repairing any torn trailing write. Replay runs
    /// against a plain handle of its own so it can truncate a torn tail;
    /// the long-lived `writer`/`reader` pair is opened fresh afterwards,
    /// each seeing that already-repaired length.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (index, end_offset) = Self::replay_and_repair(&path)?;
        let writer = FileWriter::try_create_or_append(path.clone())?;
        let reader = FileReader::try_open_existing(path.clone())?;
        Ok(Bucket { writer, reader, index, end_offset })
    }

    fn replay_and_repair(path: &Path) -> Result<(HashMap<NodeId, IndexEntry>, u64)> {
        let mut file = fs::OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let mut index = HashMap::new();
        let len = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;
        let mut pos: u64 = 0;
        let mut good_end: u64 = 0;
        let header_len = record_header_len() as u64;
        while pos + header_len <= len {
            let mut header = [0_u8; 20];
            if file.read_exact(&mut header[..header_len as usize]).is_err() {
                break;
            }
            let node_id_raw = u128::from_le_bytes(header[0..16].try_into().unwrap());
            let rec_len = u32::from_le_bytes(header[16..20].try_into().unwrap());
            let payload_start = pos + header_len;
            let payload_end = payload_start + rec_len as u64;
            let record_end = payload_end + HASH_LEN as u64;
            if record_end > len {
                break; // torn trailing write
            }
            let mut payload = vec![0_u8; rec_len as usize];
            file.read_exact(&mut payload)?;
            let mut checksum = [0_u8; HASH_LEN];
            file.read_exact(&mut checksum)?;
            let actual: [u8; HASH_LEN] = Sha256::digest(&payload).into();
            if actual != checksum {
                break; // torn / corrupt record
            }
            let node_id = NodeId::from_permanent(node_id_raw);
            if rec_len == 0 {
                index.remove(&node_id);
            } else {
                index.insert(node_id, IndexEntry { offset: payload_start, len: rec_len });
            }
            pos = record_end;
            good_end = record_end;
        }
        if good_end != len {
            warn!(target: "mckoi", bucket = %path.display(), good_end, len, "truncating torn bucket tail");
            file.set_len(good_end)?;
        }
        Ok((index, good_end))
    }

    fn append_record(&mut self, node_id: NodeId, payload: &[u8]) -> Result<u64> {
        self.writer.seek(SeekFrom::Start(self.end_offset))?;
        let checksum: [u8; HASH_LEN] = Sha256::digest(payload).into();
        let payload_offset = self.end_offset + record_header_len() as u64;
        self.writer.write_all(&node_id.as_u128().to_le_bytes())?;
        self.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(payload)?;
        self.writer.write_all(&checksum)?;
        self.writer.sync_all()?;
        self.end_offset = payload_offset + payload.len() as u64 + HASH_LEN as u64;
        Ok(payload_offset)
    }

    /// Idempotent when `bytes` matches a prior write for the same id;
    /// conflicting payloads fail with `ImmutableConflict` (spec §4.1).
    pub fn write(&mut self, node_id: NodeId, bytes: &[u8]) -> Result<()> {
        if let Some(existing) = self.read(node_id)? {
            if existing == bytes {
                return Ok(());
            }
            return Err(err_kind(
                ErrorKind::ImmutableConflict,
                format!("conflicting payload for permanent node id {node_id:?}"),
            ));
        }
        let offset = self.append_record(node_id, bytes)?;
        self.index.insert(node_id, IndexEntry { offset, len: bytes.len() as u32 });
        Ok(())
    }

    pub fn read(&mut self, node_id: NodeId) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.index.get(&node_id).copied() else {
            return Ok(None);
        };
        self.reader.seek(SeekFrom::Start(entry.offset))?;
        let mut buf = vec![0_u8; entry.len as usize];
        self.reader.read_exact(&mut buf)?;
        Ok(Some(buf))
    }

    pub fn delete(&mut self, node_id: NodeId) -> Result<()> {
        if self.index.remove(&node_id).is_none() {
            return Ok(());
        }
        self.append_record(node_id, &[])?;
        Ok(())
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.index.keys().copied()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket-0.dat");
        let mut b = Bucket::open(&path).unwrap();
        let id = NodeId::from_permanent(1);
        b.write(id, b"hello").unwrap();
        assert_eq!(b.read(id).unwrap(), Some(b"hello".to_vec()));
        b.delete(id).unwrap();
        assert_eq!(b.read(id).unwrap(), None);
    }

    #[test]
    fn test_write_is_idempotent_for_same_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket-0.dat");
        let mut b = Bucket::open(&path).unwrap();
        let id = NodeId::from_permanent(9);
        b.write(id, b"v1").unwrap();
        b.write(id, b"v1").unwrap();
        assert_eq!(b.read(id).unwrap(), Some(b"v1".to_vec()));
    }

    #[test]
    fn test_write_rejects_conflicting_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket-0.dat");
        let mut b = Bucket::open(&path).unwrap();
        let id = NodeId::from_permanent(9);
        b.write(id, b"v1").unwrap();
        let err = b.write(id, b"v2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImmutableConflict);
    }

    #[test]
    fn test_reopen_rebuilds_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket-0.dat");
        {
            let mut b = Bucket::open(&path).unwrap();
            b.write(NodeId::from_permanent(1), b"a").unwrap();
            b.write(NodeId::from_permanent(2), b"bb").unwrap();
            b.delete(NodeId::from_permanent(1)).unwrap();
        }
        let mut b2 = Bucket::open(&path).unwrap();
        assert_eq!(b2.read(NodeId::from_permanent(1)).unwrap(), None);
        assert_eq!(b2.read(NodeId::from_permanent(2)).unwrap(), Some(b"bb".to_vec()));
    }

    #[test]
    fn test_torn_trailing_write_is_truncated_and_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket-0.dat");
        {
            let mut b = Bucket::open(&path).unwrap();
            b.write(NodeId::from_permanent(1), b"good").unwrap();
        }
        // Simulate a torn write: append a truncated record after the good one.
        {
            use std::io::Write as _;
            let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&NodeId::from_permanent(2).as_u128().to_le_bytes()).unwrap();
            f.write_all(&100_u32.to_le_bytes()).unwrap(); // claims 100 bytes, none follow
        }
        let mut b = Bucket::open(&path).unwrap();
        assert_eq!(b.read(NodeId::from_permanent(1)).unwrap(), Some(b"good".to_vec()));
        assert_eq!(b.read(NodeId::from_permanent(2)).unwrap(), None);
    }
}
