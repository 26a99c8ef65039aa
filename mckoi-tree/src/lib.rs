mod block_source;
mod cow_tree;
mod gc;
mod heap;
mod index_tree;
mod node_cache;
mod transaction;

pub use block_source::BlockSource;
pub use gc::{reachable_from, sweep};
pub use heap::Heap;
pub use node_cache::{NodeCache, DEFAULT_BUDGET_BYTES as DEFAULT_NODE_CACHE_BUDGET_BYTES};
pub use transaction::{empty_index_root, DataFile, Transaction};
