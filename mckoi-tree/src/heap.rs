// A transaction's private heap of dirty nodes (spec §4.4.3, §4.5): "not
// shared; exclusively owned by the transaction handle." Every node a
// transaction creates or copies-on-write lives here under a temporary id
// until flush rewrites it to a permanent one.

use std::collections::HashMap;

use mckoi_net::NodeId;
use mckoi_store::Node;

#[derive(Default)]
pub struct Heap {
    next_temp: u64,
    dirty: HashMap<NodeId, Node>,
    /// `permanent_parent → temp_child` forwarding recorded while copying a
    /// path to root on write (spec §4.4.3 step 1), and later extended by
    /// flush with `temp → permanent` entries so a temp id already written
    /// out mid-transaction still resolves (spec §4.4.4).
    forward: HashMap<NodeId, NodeId>,
}

impl Heap {
    pub fn new() -> Self {
        Heap::default()
    }

    pub fn alloc_temp(&mut self, node: Node) -> NodeId {
        let id = NodeId::from_temporary(self.next_temp);
        self.next_temp += 1;
        self.dirty.insert(id, node);
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.dirty.get(&id)
    }

    pub fn record_forward(&mut self, from: NodeId, to: NodeId) {
        self.forward.insert(from, to);
    }

    /// Resolves `id` through any forwarding chain recorded so far (e.g. a
    /// node flushed mid-transaction then read again by a later operation).
    pub fn resolve(&self, mut id: NodeId) -> NodeId {
        while let Some(&next) = self.forward.get(&id) {
            id = next;
        }
        id
    }

    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.dirty.contains_key(&id)
    }

    pub fn dirty_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.dirty.keys().copied()
    }

    pub fn remove_dirty(&mut self, id: NodeId) -> Option<Node> {
        self.dirty.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.dirty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty()
    }
}
