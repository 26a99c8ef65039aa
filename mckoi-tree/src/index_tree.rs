// The key index (spec §4.4.1): a tree mapping keys to subtree roots,
// sharing the same on-disk node shape as the positional tree but keyed by
// `left_key` instead of cumulative byte size. Leaves hold a sorted run of
// (key, subtree root) pairs packed 32 bytes apiece.

use mckoi_base::Result;
use mckoi_net::{Key, NodeId};
use mckoi_store::{BranchEntry, Node, MAX_LEAF_PAYLOAD};

use crate::block_source::BlockSource;
use crate::heap::Heap;
use crate::node_cache::NodeCache;

const ENTRY_BYTES: usize = 32; // key:16 + node_id:16
const MAX_LEAF_ENTRIES: usize = MAX_LEAF_PAYLOAD / ENTRY_BYTES;
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

fn encode_leaf(entries: &[(Key, NodeId)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * ENTRY_BYTES);
    for (k, v) in entries {
        out.extend_from_slice(&k.as_u128().to_le_bytes());
        out.extend_from_slice(&v.as_u128().to_le_bytes());
    }
    out
}

pub(crate) fn decode_leaf_entries(bytes: &[u8]) -> Vec<(Key, NodeId)> {
    bytes
        .chunks_exact(ENTRY_BYTES)
        .map(|chunk| {
            let k = u128::from_le_bytes(chunk[0..16].try_into().unwrap());
            let v = u128::from_le_bytes(chunk[16..32].try_into().unwrap());
            (Key::from_u128(k), NodeId::from_raw(v))
        })
        .collect()
}

pub(crate) fn flatten_entries(
    heap: &Heap,
    cache: &NodeCache,
    source: &dyn BlockSource,
    id: NodeId,
) -> Result<Vec<(Key, NodeId)>> {
    let node = load(heap, cache, source, id)?;
    match node {
        Node::Leaf { bytes, .. } => Ok(decode_leaf_entries(&bytes)),
        Node::Branch { entries } => {
            let mut out = Vec::new();
            for e in entries {
                out.extend(flatten_entries(heap, cache, source, e.child)?);
            }
            Ok(out)
        }
    }
}

/// Binary-searches `entries` by `left_key` for the child that could hold
/// `key` (spec §4.4.2).
fn locate_by_key(entries: &[BranchEntry], key: u128) -> usize {
    let idx = entries.partition_point(|e| e.left_key <= key);
    idx.saturating_sub(1).min(entries.len() - 1)
}

pub fn lookup(
    heap: &Heap,
    cache: &NodeCache,
    source: &dyn BlockSource,
    root: Option<NodeId>,
    key: Key,
) -> Result<Option<NodeId>> {
    let Some(root) = root else { return Ok(None) };
    lookup_rec(heap, cache, source, root, key)
}

fn lookup_rec(
    heap: &Heap,
    cache: &NodeCache,
    source: &dyn BlockSource,
    id: NodeId,
    key: Key,
) -> Result<Option<NodeId>> {
    match load(heap, cache, source, id)? {
        Node::Leaf { bytes, .. } => {
            Ok(decode_leaf_entries(&bytes).into_iter().find(|(k, _)| *k == key).map(|(_, v)| v))
        }
        Node::Branch { entries } => {
            if entries.is_empty() {
                return Ok(None);
            }
            let idx = locate_by_key(&entries, key.as_u128());
            lookup_rec(heap, cache, source, entries[idx].child, key)
        }
    }
}

fn group_sizes(n: usize) -> Vec<usize> {
    if n <= MAX_BRANCH_FANOUT {
        return vec![n];
    }
    let num_groups = n.div_ceil(MAX_BRANCH_FANOUT);
    let base = n / num_groups;
    let rem = n % num_groups;
    (0..num_groups).map(|i| if i < rem { base + 1 } else { base }).collect()
}

/// Rebuilds the index from a sorted, deduplicated `(key, value)` list.
pub fn build_from_entries(heap: &mut Heap, entries: &[(Key, NodeId)]) -> NodeId {
    if entries.is_empty() {
        return heap.alloc_temp(Node::new_leaf(Vec::new()));
    }
    let mut level: Vec<(NodeId, u64, u128)> = entries
        .chunks(MAX_LEAF_ENTRIES)
        .map(|chunk| {
            let left_key = chunk[0].0.as_u128();
            let bytes = encode_leaf(chunk);
            (heap.alloc_temp(Node::new_leaf(bytes)), 0, left_key)
        })
        .collect();
    while level.len() > 1 {
        level = pack_level(heap, level);
    }
    level[0].0
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
        let left_key = entries[0].left_key;
        let id = heap.alloc_temp(Node::new_branch(entries));
        out.push((id, 0, left_key));
    }
    out
}

pub fn insert(
    heap: &mut Heap,
    cache: &NodeCache,
    source: &dyn BlockSource,
    root: Option<NodeId>,
    key: Key,
    value: NodeId,
) -> Result<NodeId> {
    let mut flat = match root {
        Some(root) => flatten_entries(heap, cache, source, root)?,
        None => Vec::new(),
    };
    flat.retain(|(k, _)| *k != key);
    let pos = flat.partition_point(|(k, _)| *k < key);
    flat.insert(pos, (key, value));
    Ok(build_from_entries(heap, &flat))
}

pub fn remove(
    heap: &mut Heap,
    cache: &NodeCache,
    source: &dyn BlockSource,
    root: NodeId,
    key: Key,
) -> Result<NodeId> {
    let mut flat = flatten_entries(heap, cache, source, root)?;
    flat.retain(|(k, _)| *k != key);
    Ok(build_from_entries(heap, &flat))
}
