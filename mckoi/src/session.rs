// Ties a manager, a root server, and a handful of block server replicas
// together in one process (SPEC_FULL.md §2), each reachable only through
// the same `mckoi_net::wire` framing a real deployment would use, just
// carried over an in-memory `DuplexStream` instead of a `TcpStream`. This
// is what every scenario in spec.md §8 drives end to end.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use mckoi_base::{CommitFaultKind, Result};
use mckoi_manager::{ManagerServer, Quorum};
use mckoi_net::{BlockServerId, Key, NodeId, PathName};
use mckoi_root::{CommitOutcome, RootServer};
use mckoi_store::BlockServer;
use mckoi_tree::{empty_index_root, BlockSource, DataFile, NodeCache, Transaction};
use tracing::{info, warn};

use crate::block_source::ClusterBlockSource;
use crate::channel::{Channel, StreamChannel};
use crate::cluster_client::ClusterClient;
use crate::duplex::DuplexStream;

const HARNESS_SECRET: &[u8] = b"mckoi-in-process-harness-secret";

/// How many times `Session::commit` rebases a `MergeRequired` transaction
/// against the now-current root before giving up and handing the fault
/// back to the caller (spec §4.3.2 step 5).
const MAX_MERGE_RETRIES: u32 = 4;

/// A transaction opened through a `Session`, remembering the base root it
/// started from so `Session::commit` can hand the root server both ends of
/// the commit (spec §4.3.2), and which keys it wrote so a `MergeRequired`
/// outcome can be rebased onto the new current root and resubmitted
/// without the caller redoing any work (S2: disjoint concurrent commits
/// auto-merge).
pub struct OpenTransaction {
    tx: Transaction,
    path: PathName,
    base_root: NodeId,
    written_keys: Vec<Key>,
}

impl OpenTransaction {
    pub fn data_file(&mut self, key: Key) -> Result<DataFile<'_>> {
        self.written_keys.push(key);
        self.tx.data_file(key)
    }

    pub fn touch_unique(&mut self, key: Key) {
        self.tx.touch_unique(key)
    }

    pub fn dispose(mut self) {
        self.tx.dispose();
    }
}

/// Default interval for a path's background GC sweep (SPEC_FULL.md
/// §4.4.8), when no config override applies.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone)]
pub struct Session {
    client: ClusterClient,
    source: Arc<dyn BlockSource>,
    cache: Arc<NodeCache>,
    root: Arc<RootServer>,
    /// Paths with a sweep currently in flight, so an interval tick or a
    /// post-commit trigger that lands while one is already running is a
    /// no-op rather than a second concurrent sweep (SPEC_FULL.md §4.4.8's
    /// per-path try-lock).
    sweeping: Arc<Mutex<HashSet<String>>>,
}

impl Session {
    /// Spawns one thread per role (manager, root, each block server
    /// replica), wired together with `DuplexStream::pair()`s, and returns
    /// a `Session` that talks to all of them only through the wire
    /// protocol's `Request`/`Response` types.
    pub fn new_in_process(data_dir: &Path, replica_count: usize) -> Result<Self> {
        let secret = HARNESS_SECRET.to_vec();

        let manager = Arc::new(ManagerServer::open(data_dir.join("manager"), Quorum::single())?);
        let root = Arc::new(RootServer::new());

        let (manager_client_end, manager_server_end) = DuplexStream::pair();
        {
            let manager = manager.clone();
            let secret = secret.clone();
            thread::spawn(move || crate::wire_server::run_manager_loop(manager_server_end, &secret, &manager));
        }
        let manager_channel: Arc<dyn Channel> = Arc::new(StreamChannel::new(manager_client_end, secret.clone()));

        let (root_client_end, root_server_end) = DuplexStream::pair();
        {
            let root = root.clone();
            let secret = secret.clone();
            thread::spawn(move || crate::wire_server::run_root_loop(root_server_end, &secret, &root));
        }
        let root_channel: Arc<dyn Channel> = Arc::new(StreamChannel::new(root_client_end, secret.clone()));

        let mut block_channels = Vec::with_capacity(replica_count);
        for i in 0..replica_count {
            let dir = data_dir.join(format!("block-{i}"));
            let server = Arc::new(Mutex::new(BlockServer::open(dir)?));
            let (client_end, server_end) = DuplexStream::pair();
            let secret_for_thread = secret.clone();
            thread::spawn(move || {
                crate::wire_server::run_block_server_loop(server_end, &secret_for_thread, &server)
            });
            let id = BlockServerId(i as u64);
            let channel: Arc<dyn Channel> = Arc::new(StreamChannel::new(client_end, secret.clone()));
            block_channels.push((id, channel));
        }

        info!(target: "mckoi", replica_count, "in-process session harness started");

        let client = ClusterClient::new(manager_channel, root_channel, block_channels);
        let source: Arc<dyn BlockSource> = Arc::new(ClusterBlockSource::new(client.clone()));
        let cache = Arc::new(NodeCache::new(mckoi_tree::DEFAULT_NODE_CACHE_BUDGET_BYTES));

        Ok(Session { client, source, cache, root, sweeping: Arc::new(Mutex::new(HashSet::new())) })
    }

    /// Creates `path` with an empty root if it doesn't already exist. Not
    /// a wire opcode: bootstrapping a path is an administrative act, done
    /// locally against the root server this process owns (mirrors
    /// `mckoi-admin start-root --path NAME`).
    pub fn ensure_path(&self, path: &str) -> Result<()> {
        let path_name = PathName::from(path);
        if self.root.current_root(&path_name).is_err() {
            let empty_root = empty_index_root(&*self.source)?;
            self.root.ensure_path(&path_name, empty_root);
        }
        Ok(())
    }

    pub fn begin(&self, path: &str) -> Result<OpenTransaction> {
        let path_name = PathName::from(path);
        let base_root = self.client.rs_begin(&path_name)?;
        let tx = Transaction::open(self.source.clone(), self.cache.clone(), Some(base_root));
        Ok(OpenTransaction { tx, path: path_name, base_root, written_keys: Vec::new() })
    }

    /// Flushes the transaction's temporary nodes, proposes the result to
    /// the root server, and returns its verdict (spec §4.3.2). A
    /// `Fault(MergeRequired)` means every intervening commit overlapped
    /// only softly (or not at all): this replays the transaction's writes
    /// onto the now-current root and resubmits, up to `MAX_MERGE_RETRIES`
    /// times, so disjoint concurrent commits succeed without the caller
    /// having to retry by hand (S2).
    pub fn commit(&self, mut open: OpenTransaction) -> Result<CommitOutcome> {
        let proposed_root = open.tx.prepare_commit()?;
        let touched_bytes = rmp_serde::to_vec(open.tx.touched_ranges())?;
        let outcome =
            self.client.rs_commit(&open.path, open.base_root, proposed_root, touched_bytes)?;
        match outcome {
            CommitOutcome::Fault(CommitFaultKind::MergeRequired) => {
                self.rebase_and_retry(open, MAX_MERGE_RETRIES)
            }
            CommitOutcome::Committed { .. } => {
                self.trigger_gc_sweep(open.path.0.clone());
                Ok(outcome)
            }
            other => Ok(other),
        }
    }

    fn rebase_and_retry(&self, mut open: OpenTransaction, retries_left: u32) -> Result<CommitOutcome> {
        if retries_left == 0 {
            warn!(target: "mckoi", path = %open.path.0, "exhausted merge retries, surfacing conflict");
            return Ok(CommitOutcome::Fault(CommitFaultKind::MergeRequired));
        }
        let new_base = self.client.rs_root(&open.path)?;
        let mut rebased = Transaction::open(self.source.clone(), self.cache.clone(), Some(new_base));
        for key in open.written_keys.iter().copied() {
            let mut src = open.tx.data_file(key)?;
            let size = src.size()?;
            let bytes = src.get(size)?;
            rebased.data_file(key)?.put(&bytes)?;
        }

        let proposed_root = rebased.prepare_commit()?;
        let touched_bytes = rmp_serde::to_vec(rebased.touched_ranges())?;
        let outcome = self.client.rs_commit(&open.path, new_base, proposed_root, touched_bytes)?;
        match outcome {
            CommitOutcome::Fault(CommitFaultKind::MergeRequired) => {
                open.tx = rebased;
                open.base_root = new_base;
                self.rebase_and_retry(open, retries_left - 1)
            }
            other => Ok(other),
        }
    }

    /// Fires a background sweep attempt for `path` without blocking the
    /// caller (SPEC_FULL.md §4.4.8: "also after any commit that advances
    /// current_root"). A no-op if a sweep for this path is already in
    /// flight.
    fn trigger_gc_sweep(&self, path: String) {
        if !self.sweeping.lock().unwrap().insert(path.clone()) {
            return;
        }
        let session = self.clone();
        thread::spawn(move || {
            if let Err(e) = session.gc_sweep(&path) {
                warn!(target: "mckoi", path = %path, error = %e, "post-commit gc sweep failed");
            }
            session.sweeping.lock().unwrap().remove(&path);
        });
    }

    /// Runs `gc_sweep(path)` on a fixed interval for as long as `Session`
    /// is alive (SPEC_FULL.md §4.4.8's config-controlled background
    /// sweep). Shares the same per-path try-lock as the post-commit
    /// trigger, so a tick that lands mid-sweep is a no-op rather than a
    /// second concurrent pass.
    pub fn spawn_gc_loop(&self, path: &str, interval: Duration) {
        let session = self.clone();
        let path = path.to_string();
        thread::spawn(move || loop {
            thread::sleep(interval);
            session.trigger_gc_sweep(path.clone());
        });
    }

    pub fn current_root(&self, path: &str) -> Result<NodeId> {
        self.client.rs_root(&PathName::from(path))
    }

    pub fn rollback(&self, path: &str, to_commit_id: u64) -> Result<NodeId> {
        self.client.rs_rollback(&PathName::from(path), to_commit_id)
    }

    /// Runs the lazy mark-sweep GC (spec §4.4.6, SPEC_FULL.md §4.4.8) for
    /// `path`, retaining only what's reachable from the current root. A
    /// more complete implementation would also retain the root server's
    /// history-ring roots; this harness doesn't expose those outside the
    /// root server itself, so only `current_root` is retained here.
    pub fn gc_sweep(&self, path: &str) -> Result<Vec<NodeId>> {
        let current = self.current_root(path)?;
        let heap = mckoi_tree::Heap::new();
        let cache = NodeCache::new(mckoi_tree::DEFAULT_NODE_CACHE_BUDGET_BYTES);
        let reachable = mckoi_tree::reachable_from(&heap, &cache, &*self.source, &[current])?;
        mckoi_tree::sweep(&*self.source, &reachable)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_bootstrap_commit_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new_in_process(dir.path(), 1).unwrap();
        session.ensure_path("testdb").unwrap();

        let mut tx = session.begin("testdb").unwrap();
        let k1 = Key::new(0, 0, 1);
        tx.data_file(k1).unwrap().put(b"The Hitchhiker's Guide to the Gal").unwrap();
        let outcome = session.commit(tx).unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed { .. }));

        let mut tx2 = session.begin("testdb").unwrap();
        let mut df = tx2.data_file(k1).unwrap();
        let size = df.size().unwrap();
        assert_eq!(df.get(size).unwrap(), b"The Hitchhiker's Guide to the Gal");
    }
}
