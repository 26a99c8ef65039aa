// Node read cache (spec §4.4.7, §4.5): bounded in bytes, LRU, thread-safe,
// holds decoded permanent nodes. Decoding on a miss happens outside the
// lock; the first decoded copy wins a racing insert. Grounded on the same
// budgeted-LRU shape as `mckoi_root::TransactionCache`, adapted to hold
// decoded `Node`s keyed by permanent `NodeId` instead of raw root bytes.

use std::collections::HashMap;
use std::sync::Mutex;

use mckoi_net::NodeId;
use mckoi_store::Node;

pub const DEFAULT_BUDGET_BYTES: u64 = 8 * 1024 * 1024;

struct Entry {
    node: Node,
    approx_bytes: u64,
    last_used: u64,
}

struct Inner {
    budget_bytes: u64,
    used_bytes: u64,
    clock: u64,
    entries: HashMap<NodeId, Entry>,
}

pub struct NodeCache {
    inner: Mutex<Inner>,
}

fn approx_size(node: &Node) -> u64 {
    match node {
        Node::Leaf { bytes, .. } => bytes.len() as u64 + 16,
        Node::Branch { entries } => (entries.len() as u64) * 40 + 16,
    }
}

impl NodeCache {
    pub fn new(budget_bytes: u64) -> Self {
        NodeCache {
            inner: Mutex::new(Inner {
                budget_bytes,
                used_bytes: 0,
                clock: 0,
                entries: HashMap::new(),
            }),
        }
    }

    /// Returns a decoded clone if present, bumping its recency. Does not
    /// decode on miss: the caller decodes outside any lock and calls
    /// `insert` with the result (spec §4.5's "racing-insert resolution
    /// that keeps the first decoded copy").
    pub fn get(&self, id: NodeId) -> Option<Node> {
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let clock = inner.clock;
        let entry = inner.entries.get_mut(&id)?;
        entry.last_used = clock;
        Some(entry.node.clone())
    }

    /// Inserts a freshly decoded node, unless another thread already won
    /// the race for the same id (first decoded copy is kept, per spec).
    pub fn insert(&self, id: NodeId, node: Node) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.contains_key(&id) {
            return;
        }
        inner.clock += 1;
        let clock = inner.clock;
        let approx_bytes = approx_size(&node);
        inner.used_bytes += approx_bytes;
        inner.entries.insert(id, Entry { node, approx_bytes, last_used: clock });
        evict_to_budget(&mut inner);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn evict_to_budget(inner: &mut Inner) {
    while inner.used_bytes > inner.budget_bytes {
        let Some((&victim, _)) = inner.entries.iter().min_by_key(|(_, e)| e.last_used) else {
            break;
        };
        if let Some(entry) = inner.entries.remove(&victim) {
            inner.used_bytes = inner.used_bytes.saturating_sub(entry.approx_bytes);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_insert_then_get_roundtrip() {
        let cache = NodeCache::new(DEFAULT_BUDGET_BYTES);
        let id = NodeId::from_permanent(1);
        cache.insert(id, Node::new_leaf(vec![1, 2, 3]));
        assert_eq!(cache.get(id), Some(Node::new_leaf(vec![1, 2, 3])));
    }

    #[test]
    fn test_racing_insert_keeps_first_copy() {
        let cache = NodeCache::new(DEFAULT_BUDGET_BYTES);
        let id = NodeId::from_permanent(1);
        cache.insert(id, Node::new_leaf(vec![1]));
        cache.insert(id, Node::new_leaf(vec![2])); // loses the race
        assert_eq!(cache.get(id), Some(Node::new_leaf(vec![1])));
    }

    #[test]
    fn test_eviction_under_budget_pressure() {
        let cache = NodeCache::new(100);
        for i in 0..20u128 {
            cache.insert(NodeId::from_permanent(i), Node::new_leaf(vec![0xAA; 32]));
        }
        assert!(cache.len() < 20);
    }
}
