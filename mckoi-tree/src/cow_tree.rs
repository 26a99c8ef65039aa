// The copy-on-write B+tree engine shared by every `DataFile`'s byte-stream
// subtree and by the path's key index (spec §4.4.1–§4.4.4). Both addressing
// modes reuse `mckoi_store::Node`'s single on-disk shape: position mode
// binary-searches branch entries by cumulative `subtree_byte_size`; key
// mode binary-searches by `left_key`. Reads descend the tree directly.
// Writes flatten the touched subtree to its full byte content, apply the
// edit, and rebuild a fresh tree from scratch bottom-up, packing leaves and
// branches to satisfy the ≥⅓ fill factor — every node touched is freshly
// allocated under a temporary id, which is what "never mutate a permanent
// node" requires; it trades away the usual logarithmic write cost of a
// B+tree for a simpler, obviously-correct rebuild.

use mckoi_base::Result;
use mckoi_net::NodeId;
use mckoi_store::{BranchEntry, Node, MAX_LEAF_PAYLOAD};

use crate::block_source::BlockSource;
use crate::heap::Heap;
use crate::node_cache::NodeCache;

const MAX_BRANCH_FANOUT: usize = 64;

fn load(heap: &Heap, cache: &NodeCache, source: &dyn BlockSource, id: NodeId) -> Result<Node> {
    let id = heap.resolve(id);
    if let Some(node) = heap.get(id) {
        return Ok(node.clone());
    }
    if let Some(node) = cache.get(id) {
        return Ok(node);
    }
    let node = source.read_node(id)?;
    cache.insert(id, node.clone());
    Ok(node)
}

/// Binary-searches `entries`' cumulative `subtree_byte_size` for the child
/// containing byte `offset`, returning its index and the offset within it.
fn locate_by_position(entries: &[BranchEntry], offset: u64) -> (usize, u64) {
    let mut prefix = Vec::with_capacity(entries.len() + 1);
    prefix.push(0u64);
    for e in entries {
        prefix.push(prefix.last().unwrap() + e.subtree_byte_size);
    }
    let idx = prefix.partition_point(|&p| p <= offset).saturating_sub(1).min(entries.len() - 1);
    (idx, offset - prefix[idx])
}

fn read_range_into(
    heap: &Heap,
    cache: &NodeCache,
    source: &dyn BlockSource,
    id: NodeId,
    offset: u64,
    len: u64,
    out: &mut Vec<u8>,
) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    let node = load(heap, cache, source, id)?;
    match node {
        Node::Leaf { bytes, .. } => {
            let start = offset as usize;
            let end = ((offset + len) as usize).min(bytes.len());
            if start < bytes.len() {
                out.extend_from_slice(&bytes[start..end]);
            }
        }
        Node::Branch { entries } => {
            let (mut idx, mut within) = locate_by_position(&entries, offset);
            let mut remaining = len;
            while remaining > 0 && idx < entries.len() {
                let entry = &entries[idx];
                let take = remaining.min(entry.subtree_byte_size.saturating_sub(within));
                if take > 0 {
                    read_range_into(heap, cache, source, entry.child, within, take, out)?;
                    remaining -= take;
                }
                idx += 1;
                within = 0;
            }
        }
    }
    Ok(())
}

pub fn read_range(
    heap: &Heap,
    cache: &NodeCache,
    source: &dyn BlockSource,
    root: NodeId,
    offset: u64,
    len: u64,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(len as usize);
    read_range_into(heap, cache, source, root, offset, len, &mut out)?;
    Ok(out)
}

fn flatten(heap: &Heap, cache: &NodeCache, source: &dyn BlockSource, id: NodeId) -> Result<Vec<u8>> {
    let node = load(heap, cache, source, id)?;
    match node {
        Node::Leaf { bytes, .. } => Ok(bytes),
        Node::Branch { entries } => {
            let mut out = Vec::new();
            for e in entries {
                out.extend(flatten(heap, cache, source, e.child)?);
            }
            Ok(out)
        }
    }
}

pub fn total_size(heap: &Heap, cache: &NodeCache, source: &dyn BlockSource, root: NodeId) -> Result<u64> {
    Ok(load(heap, cache, source, root)?.subtree_byte_size())
}

/// Distributes `n` items across the minimum number of groups whose size is
/// within `[MAX_BRANCH_FANOUT / 3, MAX_BRANCH_FANOUT]`, which keeps every
/// branch at or above the ⅓ fill factor.
fn group_sizes(n: usize) -> Vec<usize> {
    if n <= MAX_BRANCH_FANOUT {
        return vec![n];
    }
    let num_groups = n.div_ceil(MAX_BRANCH_FANOUT);
    let base = n / num_groups;
    let rem = n % num_groups;
    (0..num_groups).map(|i| if i < rem { base + 1 } else { base }).collect()
}

fn pack_level(heap: &mut Heap, level: Vec<(NodeId, u64, u128)>) -> Vec<(NodeId, u64, u128)> {
    let groups = group_sizes(level.len());
    let mut iter = level.into_iter();
    let mut out = Vec::with_capacity(groups.len());
    for group_len in groups {
        let mut entries = Vec::with_capacity(group_len);
        for _ in 0..group_len {
            let (child, size, left_key) = iter.next().expect("group size exceeds remaining items");
            entries.push(BranchEntry { child, left_key, subtree_byte_size: size });
        }
        let total = entries.iter().map(|e| e.subtree_byte_size).sum();
        let left_key = entries[0].left_key;
        let id = heap.alloc_temp(Node::new_branch(entries));
        out.push((id, total, left_key));
    }
    out
}

/// Rebuilds a fresh positional subtree from flat bytes, bottom-up.
pub fn build_from_bytes(heap: &mut Heap, bytes: &[u8]) -> NodeId {
    if bytes.is_empty() {
        return heap.alloc_temp(Node::new_leaf(Vec::new()));
    }
    let mut level: Vec<(NodeId, u64, u128)> = bytes
        .chunks(MAX_LEAF_PAYLOAD)
        .map(|chunk| (heap.alloc_temp(Node::new_leaf(chunk.to_vec())), chunk.len() as u64, 0u128))
        .collect();
    while level.len() > 1 {
        level = pack_level(heap, level);
    }
    level[0].0
}

pub fn write_bytes_at(
    heap: &mut Heap,
    cache: &NodeCache,
    source: &dyn BlockSource,
    root: NodeId,
    offset: u64,
    data: &[u8],
) -> Result<NodeId> {
    let mut flat = flatten(heap, cache, source, root)?;
    let end = offset as usize + data.len();
    if end > flat.len() {
        flat.resize(end, 0);
    }
    flat[offset as usize..end].copy_from_slice(data);
    Ok(build_from_bytes(heap, &flat))
}

pub fn set_size(
    heap: &mut Heap,
    cache: &NodeCache,
    source: &dyn BlockSource,
    root: NodeId,
    new_size: u64,
) -> Result<NodeId> {
    let mut flat = flatten(heap, cache, source, root)?;
    flat.resize(new_size as usize, 0);
    Ok(build_from_bytes(heap, &flat))
}

/// Inserts (`delta > 0`, zero-filled) or removes (`delta < 0`) bytes at
/// `offset`, shifting everything after it.
pub fn shift(
    heap: &mut Heap,
    cache: &NodeCache,
    source: &dyn BlockSource,
    root: NodeId,
    offset: u64,
    delta: i64,
) -> Result<NodeId> {
    let mut flat = flatten(heap, cache, source, root)?;
    let offset = (offset as usize).min(flat.len());
    if delta > 0 {
        let gap = vec![0u8; delta as usize];
        flat.splice(offset..offset, gap);
    } else if delta < 0 {
        let remove = (-delta) as usize;
        let end = (offset + remove).min(flat.len());
        flat.drain(offset..end);
    }
    Ok(build_from_bytes(heap, &flat))
}

/// Depth-first post-order flush (spec §4.4.4): children before parent,
/// each freshly-flushed node recorded as a forwarding pointer so later
/// reads of its temporary id in this transaction still resolve.
pub fn flush(heap: &mut Heap, source: &dyn BlockSource, root: NodeId) -> Result<NodeId> {
    let id = heap.resolve(root);
    if id.is_permanent() {
        return Ok(id);
    }
    let node = heap.get(id).cloned().expect("dirty node missing from heap");
    let flushed = match node {
        Node::Leaf { .. } => node,
        Node::Branch { entries } => {
            let mut new_entries = Vec::with_capacity(entries.len());
            for e in entries {
                let child = flush(heap, source, e.child)?;
                new_entries.push(BranchEntry { child, left_key: e.left_key, subtree_byte_size: e.subtree_byte_size });
            }
            Node::Branch { entries: new_entries }
        }
    };
    let perm_id = source.allocate_ids(1)?[0];
    source.write_node(perm_id, &flushed)?;
    heap.record_forward(id, perm_id);
    heap.remove_dirty(id);
    Ok(perm_id)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use test_log::test;

    struct FakeSource {
        next: Mutex<u128>,
        blocks: Mutex<HashMap<NodeId, Node>>,
    }

    impl FakeSource {
        fn new() -> Self {
            FakeSource { next: Mutex::new(1), blocks: Mutex::new(HashMap::new()) }
        }
    }

    impl BlockSource for FakeSource {
        fn allocate_ids(&self, count: u32) -> Result<Vec<NodeId>> {
            let mut next = self.next.lock().unwrap();
            let ids = (0..count).map(|i| NodeId::from_permanent(*next + i as u128)).collect();
            *next += count as u128;
            Ok(ids)
        }
        fn read_node(&self, id: NodeId) -> Result<Node> {
            Ok(self.blocks.lock().unwrap().get(&id).cloned().unwrap())
        }
        fn write_node(&self, id: NodeId, node: &Node) -> Result<()> {
            self.blocks.lock().unwrap().insert(id, node.clone());
            Ok(())
        }
        fn release(&self, id: NodeId) -> Result<()> {
            self.blocks.lock().unwrap().remove(&id);
            Ok(())
        }
        fn list_known_ids(&self) -> Result<Vec<NodeId>> {
            Ok(self.blocks.lock().unwrap().keys().copied().collect())
        }
    }

    #[test]
    fn test_build_and_read_small_payload() {
        let mut heap = Heap::new();
        let cache = NodeCache::new(1024 * 1024);
        let source = FakeSource::new();
        let root = build_from_bytes(&mut heap, b"hello world");
        let out = read_range(&heap, &cache, &source, root, 0, 11).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn test_build_spans_multiple_leaves_and_branches() {
        let mut heap = Heap::new();
        let cache = NodeCache::new(1024 * 1024);
        let source = FakeSource::new();
        let data: Vec<u8> = (0..(MAX_LEAF_PAYLOAD * 200)).map(|i| (i % 256) as u8).collect();
        let root = build_from_bytes(&mut heap, &data);
        let out = read_range(&heap, &cache, &source, root, 1000, 5000).unwrap();
        assert_eq!(out, data[1000..6000]);
    }

    #[test]
    fn test_write_bytes_at_extends_with_zero_fill() {
        let mut heap = Heap::new();
        let cache = NodeCache::new(1024 * 1024);
        let source = FakeSource::new();
        let root = build_from_bytes(&mut heap, b"abc");
        let root = write_bytes_at(&mut heap, &cache, &source, root, 5, b"xyz").unwrap();
        let out = read_range(&heap, &cache, &source, root, 0, 8).unwrap();
        assert_eq!(out, b"abc\0\0xyz");
    }

    #[test]
    fn test_shift_insert_and_remove() {
        let mut heap = Heap::new();
        let cache = NodeCache::new(1024 * 1024);
        let source = FakeSource::new();
        let root = build_from_bytes(&mut heap, b"0123456789");
        let root = shift(&mut heap, &cache, &source, root, 3, 2).unwrap();
        let out = read_range(&heap, &cache, &source, root, 0, 12).unwrap();
        assert_eq!(out, b"012\0\03456789");

        let root = shift(&mut heap, &cache, &source, root, 3, -2).unwrap();
        let out = read_range(&heap, &cache, &source, root, 0, 10).unwrap();
        assert_eq!(out, b"0123456789");
    }

    #[test]
    fn test_set_size_truncates() {
        let mut heap = Heap::new();
        let cache = NodeCache::new(1024 * 1024);
        let source = FakeSource::new();
        let root = build_from_bytes(&mut heap, b"0123456789");
        let root = set_size(&mut heap, &cache, &source, root, 4).unwrap();
        let out = read_range(&heap, &cache, &source, root, 0, 4).unwrap();
        assert_eq!(out, b"0123");
        assert_eq!(total_size(&heap, &cache, &source, root).unwrap(), 4);
    }

    #[test]
    fn test_flush_rewrites_temp_ids_to_permanent_and_forwards() {
        let mut heap = Heap::new();
        let source = FakeSource::new();
        let data: Vec<u8> = (0..(MAX_LEAF_PAYLOAD * 10)).map(|i| (i % 256) as u8).collect();
        let root = build_from_bytes(&mut heap, &data);
        assert!(root.is_temporary());
        let flushed = flush(&mut heap, &source, root).unwrap();
        assert!(flushed.is_permanent());
        assert_eq!(heap.resolve(root), flushed);
        assert!(heap.is_empty());

        let cache = NodeCache::new(1024 * 1024);
        let out = read_range(&heap, &cache, &source, flushed, 0, data.len() as u64).unwrap();
        assert_eq!(out, data);
    }
}
