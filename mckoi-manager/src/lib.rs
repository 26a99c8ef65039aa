mod directory;
mod manager;
mod quorum;
mod wal;

pub use directory::{Directory, NodeEntry, ServerEntry, DEFAULT_OFFLINE_GRACE, DEFAULT_SUSPECT_GRACE};
pub use manager::ManagerServer;
pub use quorum::{PeerLink, Quorum};
pub use wal::WalOp;
