mod block_server;
mod bucket;
mod ioutil;
mod node;

pub use block_server::BlockServer;
pub use node::{BranchEntry, Node, MAX_LEAF_PAYLOAD};
