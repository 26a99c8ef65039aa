// Per-transaction state (spec §4.4, §4.5): "not shared; exclusively owned
// by the transaction handle." Owns a private heap of dirty nodes, the path's
// key index root, and the touched-ranges summary that the root server uses
// to classify conflicts at commit.

use std::sync::Arc;

use mckoi_base::{err_kind, ErrorKind, Result, TouchedRangeSummary};
use mckoi_net::{Key, NodeId};

use crate::block_source::BlockSource;
use crate::heap::Heap;
use crate::index_tree;
use crate::node_cache::NodeCache;

/// Builds and flushes a brand-new, empty key index, for a path's very
/// first root before any transaction has ever committed against it.
pub fn empty_index_root(source: &dyn BlockSource) -> Result<NodeId> {
    let mut heap = Heap::new();
    let root = index_tree::build_from_entries(&mut heap, &[]);
    crate::cow_tree::flush(&mut heap, source, root)
}

pub struct Transaction {
    source: Arc<dyn BlockSource>,
    cache: Arc<NodeCache>,
    heap: Heap,
    /// The key index root this transaction started from; `None` means an
    /// empty path with no keys written yet.
    index_root: Option<NodeId>,
    touched: TouchedRangeSummary,
    disposed: bool,
}

impl Transaction {
    pub fn open(source: Arc<dyn BlockSource>, cache: Arc<NodeCache>, base_index_root: Option<NodeId>) -> Self {
        Transaction {
            source,
            cache,
            heap: Heap::new(),
            index_root: base_index_root,
            touched: TouchedRangeSummary::new(),
            disposed: false,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.disposed {
            return Err(err_kind(ErrorKind::Invalidated, "transaction handle already disposed"));
        }
        Ok(())
    }

    /// Opens a `DataFile` cursor for `key`, creating an empty one on first
    /// use. Borrows the transaction mutably for the cursor's lifetime,
    /// which is also how this crate expresses "single-owner, one active
    /// cursor" in code rather than only in prose.
    pub fn data_file(&mut self, key: Key) -> Result<DataFile<'_>> {
        self.check_open()?;
        self.touched.touch_key(key.as_u128());
        let root = index_tree::lookup(&self.heap, &self.cache, &*self.source, self.index_root, key)?;
        Ok(DataFile { tx: self, key, root, position: 0 })
    }

    /// Marks `key` as participating in a structure where any overlapping
    /// touch from another transaction must hard-conflict (e.g. an
    /// ordered-unique index insert), rather than merge softly.
    pub fn touch_unique(&mut self, key: Key) {
        self.touched.touch_unique(key.as_u128());
    }

    pub fn touched_ranges(&self) -> &TouchedRangeSummary {
        &self.touched
    }

    /// Flushes every dirty node reachable from the current index root and
    /// returns the now-fully-permanent root, ready to hand to the root
    /// server as a `proposed_root` (spec §4.4.4's invariant: no temporary
    /// id reachable from the proposed root at commit time).
    ///
    /// A DataFile's subtree root is stored as opaque payload bytes inside
    /// an index leaf, not as a structural `Node::Branch` child, so
    /// flushing the index tree's own nodes alone would miss it. Every
    /// leaf's still-temporary subtree root is flushed first and its
    /// permanent replacement written back into the index before the index
    /// tree itself is flushed.
    pub fn prepare_commit(&mut self) -> Result<NodeId> {
        self.check_open()?;
        let current_root = match self.index_root {
            Some(root) => root,
            None => index_tree::build_from_entries(&mut self.heap, &[]),
        };
        let entries = index_tree::flatten_entries(&self.heap, &self.cache, &*self.source, current_root)?;
        let mut rebuilt = Vec::with_capacity(entries.len());
        let mut any_temp = false;
        for (key, subtree_root) in entries {
            if subtree_root.is_temporary() {
                any_temp = true;
                rebuilt.push((key, crate::cow_tree::flush(&mut self.heap, &*self.source, subtree_root)?));
            } else {
                rebuilt.push((key, subtree_root));
            }
        }
        let index_root = if any_temp {
            index_tree::build_from_entries(&mut self.heap, &rebuilt)
        } else {
            current_root
        };
        let flushed = crate::cow_tree::flush(&mut self.heap, &*self.source, index_root)?;
        self.index_root = Some(flushed);
        Ok(flushed)
    }

    /// Drops every dirty node without ever reaching a block server
    /// (spec §5 cancellation: "Temporary ids are discarded without ever
    /// reaching any block server").
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.heap = Heap::new();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

/// A cursor over one key's byte-stream subtree (spec §4.4: `DataFile`).
pub struct DataFile<'a> {
    tx: &'a mut Transaction,
    key: Key,
    root: Option<NodeId>,
    position: u64,
}

impl<'a> DataFile<'a> {
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    pub fn size(&self) -> Result<u64> {
        match self.root {
            Some(root) => crate::cow_tree::total_size(&self.tx.heap, &self.tx.cache, &*self.tx.source, root),
            None => Ok(0),
        }
    }

    fn link_root(&mut self, new_root: NodeId) -> Result<()> {
        self.root = Some(new_root);
        let index_root = index_tree::insert(
            &mut self.tx.heap,
            &self.tx.cache,
            &*self.tx.source,
            self.tx.index_root,
            self.key,
            new_root,
        )?;
        self.tx.index_root = Some(index_root);
        Ok(())
    }

    /// Reads `len` bytes at the cursor and advances it.
    pub fn get(&mut self, len: u64) -> Result<Vec<u8>> {
        let bytes = match self.root {
            Some(root) => crate::cow_tree::read_range(
                &self.tx.heap,
                &self.tx.cache,
                &*self.tx.source,
                root,
                self.position,
                len,
            )?,
            None => Vec::new(),
        };
        self.position += bytes.len() as u64;
        Ok(bytes)
    }

    /// Writes `bytes` at the cursor, extending the file with zeros if
    /// needed, and advances the cursor.
    pub fn put(&mut self, bytes: &[u8]) -> Result<()> {
        let base = self.root.unwrap_or_else(|| crate::cow_tree::build_from_bytes(&mut self.tx.heap, &[]));
        let new_root = crate::cow_tree::write_bytes_at(
            &mut self.tx.heap,
            &self.tx.cache,
            &*self.tx.source,
            base,
            self.position,
            bytes,
        )?;
        self.position += bytes.len() as u64;
        self.link_root(new_root)
    }

    pub fn set_size(&mut self, size: u64) -> Result<()> {
        let base = self.root.unwrap_or_else(|| crate::cow_tree::build_from_bytes(&mut self.tx.heap, &[]));
        let new_root =
            crate::cow_tree::set_size(&mut self.tx.heap, &self.tx.cache, &*self.tx.source, base, size)?;
        self.link_root(new_root)
    }

    /// Inserts (`delta > 0`) or removes (`delta < 0`) bytes at the cursor.
    pub fn shift(&mut self, delta: i64) -> Result<()> {
        let base = self.root.unwrap_or_else(|| crate::cow_tree::build_from_bytes(&mut self.tx.heap, &[]));
        let new_root = crate::cow_tree::shift(
            &mut self.tx.heap,
            &self.tx.cache,
            &*self.tx.source,
            base,
            self.position,
            delta,
        )?;
        self.link_root(new_root)
    }

    /// Copies `len` bytes starting at `src_position` in `src_key`'s file
    /// (within this same transaction) to `self` at its current position,
    /// advancing it (spec §4.4.5's general copy, as distinct from
    /// `replicate_from`'s zero-copy share). Takes the source by key,
    /// rather than by a second live cursor, since a transaction's heap is
    /// exclusively owned and cannot be borrowed by two cursors at once.
    pub fn copy_from(&mut self, src_key: Key, src_position: u64, len: u64) -> Result<()> {
        let src_root = index_tree::lookup(&self.tx.heap, &self.tx.cache, &*self.tx.source, self.tx.index_root, src_key)?;
        let bytes = match src_root {
            Some(root) => crate::cow_tree::read_range(
                &self.tx.heap,
                &self.tx.cache,
                &*self.tx.source,
                root,
                src_position,
                len,
            )?,
            None => Vec::new(),
        };
        self.put(&bytes)
    }

    /// Shares `src_key`'s subtree by reference rather than copying bytes
    /// (spec §4.4.5). Valid only once `src_key`'s subtree has been flushed
    /// to a permanent id.
    pub fn replicate_from(&mut self, src_key: Key) -> Result<()> {
        let src_root = index_tree::lookup(&self.tx.heap, &self.tx.cache, &*self.tx.source, self.tx.index_root, src_key)?;
        match src_root {
            Some(root) if root.is_permanent() => {
                self.position = 0;
                self.link_root(root)
            }
            Some(_) => Err(err_kind(
                ErrorKind::Internal,
                "replicate_from source subtree is not yet flushed to a permanent id",
            )),
            None => self.set_size(0),
        }
    }
}
