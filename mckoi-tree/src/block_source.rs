// The seam between this crate and the rest of the cluster: a transaction
// never talks to a manager or block server directly, only through this
// trait. Concrete implementations (in-process harness, or a real
// manager/block-server wire client) live in the top-level `mckoi` crate.

use mckoi_base::Result;
use mckoi_net::NodeId;
use mckoi_store::Node;

pub trait BlockSource: Send + Sync {
    /// Obtains `count` freshly allocated permanent node ids for this path.
    fn allocate_ids(&self, count: u32) -> Result<Vec<NodeId>>;

    /// Reads a permanent node's decoded form. Never called with a
    /// temporary id.
    fn read_node(&self, id: NodeId) -> Result<Node>;

    /// Writes a node under its already-allocated permanent id.
    fn write_node(&self, id: NodeId, node: &Node) -> Result<()>;

    /// Releases a replica no longer reachable from any retained root
    /// (spec §4.4.6 GC sweep).
    fn release(&self, id: NodeId) -> Result<()>;

    /// Every node id this path's replicas currently hold, for the GC
    /// sweep to compare against the reachable set.
    fn list_known_ids(&self) -> Result<Vec<NodeId>>;
}
