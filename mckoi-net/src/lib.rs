mod auth;
mod key;
mod node_id;
mod wire;

pub use auth::{compute_tag, verify_tag, TAG_LEN};
pub use key::Key;
pub use node_id::NodeId;
pub use wire::{
    read_message, response_to_err, write_message, BlockServerId, CommitFaultWire, PathName,
    PeerStatus, Request, Response,
};
