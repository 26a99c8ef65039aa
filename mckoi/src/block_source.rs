// Implements `mckoi_tree::BlockSource` over a `ClusterClient`: this is the
// seam `mckoi-tree`'s `Transaction` was built against (see its module doc
// comment). Writes fan out to every known block server replica; reads try
// replicas in the manager's returned order, falling back on failure (S5).

use mckoi_base::Result;
use mckoi_net::NodeId;
use mckoi_store::Node;
use mckoi_tree::BlockSource;

use crate::cluster_client::ClusterClient;

pub struct ClusterBlockSource {
    client: ClusterClient,
}

impl ClusterBlockSource {
    pub fn new(client: ClusterClient) -> Self {
        ClusterBlockSource { client }
    }
}

impl BlockSource for ClusterBlockSource {
    fn allocate_ids(&self, count: u32) -> Result<Vec<NodeId>> {
        self.client.allocate_ids(count)
    }

    fn read_node(&self, id: NodeId) -> Result<Node> {
        let bytes = self.client.read_with_failover(id)?;
        Node::decode(&bytes)
    }

    fn write_node(&self, id: NodeId, node: &Node) -> Result<()> {
        let bytes = node.encode();
        for replica in self.client.replica_ids() {
            self.client.assign(id, replica)?;
            self.client.write_to(replica, id, bytes.clone())?;
        }
        Ok(())
    }

    fn release(&self, id: NodeId) -> Result<()> {
        for replica in self.client.replica_ids() {
            self.client.delete_from(replica, id)?;
        }
        Ok(())
    }

    fn list_known_ids(&self) -> Result<Vec<NodeId>> {
        self.client.list_known_ids()
    }
}
