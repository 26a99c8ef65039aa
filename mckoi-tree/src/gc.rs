// Garbage collection (spec §4.4.6): a lazy, interruptible mark-sweep, not
// reference counting. A node is kept iff it's reachable from `current_root`
// or any history root still retained by the root server's ring buffer.

use std::collections::HashSet;

use mckoi_base::Result;
use mckoi_net::NodeId;
use mckoi_store::Node;

use crate::block_source::BlockSource;
use crate::heap::Heap;
use crate::index_tree::decode_leaf_entries;
use crate::node_cache::NodeCache;

fn walk_position(
    heap: &Heap,
    cache: &NodeCache,
    source: &dyn BlockSource,
    id: NodeId,
    seen: &mut HashSet<NodeId>,
) -> Result<()> {
    if !seen.insert(id) {
        return Ok(());
    }
    let node = match heap.get(id) {
        Some(node) => node.clone(),
        None => {
            if let Some(node) = cache.get(id) {
                node
            } else {
                let node = source.read_node(id)?;
                cache.insert(id, node.clone());
                node
            }
        }
    };
    if let Node::Branch { entries } = node {
        for e in entries {
            walk_position(heap, cache, source, e.child, seen)?;
        }
    }
    Ok(())
}

fn walk_index(
    heap: &Heap,
    cache: &NodeCache,
    source: &dyn BlockSource,
    id: NodeId,
    seen: &mut HashSet<NodeId>,
) -> Result<()> {
    if !seen.insert(id) {
        return Ok(());
    }
    let node = match heap.get(id) {
        Some(node) => node.clone(),
        None => {
            if let Some(node) = cache.get(id) {
                node
            } else {
                let node = source.read_node(id)?;
                cache.insert(id, node.clone());
                node
            }
        }
    };
    match node {
        Node::Leaf { bytes, .. } => {
            for (_, subtree_root) in decode_leaf_entries(&bytes) {
                walk_position(heap, cache, source, subtree_root, seen)?;
            }
        }
        Node::Branch { entries } => {
            for e in entries {
                walk_index(heap, cache, source, e.child, seen)?;
            }
        }
    }
    Ok(())
}

/// Every node id reachable from a set of retained key-index roots (the
/// current root plus whatever history roots the root server still holds).
pub fn reachable_from(
    heap: &Heap,
    cache: &NodeCache,
    source: &dyn BlockSource,
    retained_index_roots: &[NodeId],
) -> Result<HashSet<NodeId>> {
    let mut seen = HashSet::new();
    for &root in retained_index_roots {
        walk_index(heap, cache, source, root, &mut seen)?;
    }
    Ok(seen)
}

/// Releases every known replica not in `reachable`. Safe to interrupt:
/// callers may pass a subset of `list_known_ids()` and resume later.
pub fn sweep(source: &dyn BlockSource, reachable: &HashSet<NodeId>) -> Result<Vec<NodeId>> {
    let mut released = Vec::new();
    for id in source.list_known_ids()? {
        if !reachable.contains(&id) {
            source.release(id)?;
            released.push(id);
        }
    }
    Ok(released)
}
