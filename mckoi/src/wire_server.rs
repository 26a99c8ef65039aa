// Server-side opcode dispatch (spec §6.2) for each of the three persistent
// roles. A role's loop just repeatedly reads a `Request`, dispatches it
// against the owned server type, and writes back a `Response`, exiting
// cleanly when the peer end closes (mirrors the teacher's
// `submerge-txn` node-loop shape, generalized from its bespoke protocol
// messages to this crate's `mckoi_net::wire` opcodes).

use std::io::{Read, Write};
use std::sync::Mutex;

use mckoi_base::{CommitFaultKind, ErrorKind};
use mckoi_net::{read_message, write_message, Request, Response};
use mckoi_manager::ManagerServer;
use mckoi_root::{CommitOutcome, RootServer, TxHandle};
use mckoi_store::BlockServer;
use tracing::{debug, warn};

fn dispatch_block(req: Request, server: &Mutex<BlockServer>) -> Response {
    match req {
        Request::Ping => Response::Pong,
        Request::BsRead { node_id } => {
            let mut s = server.lock().unwrap();
            match s.read(node_id) {
                Ok(bytes) => Response::Bytes(bytes),
                Err(e) if e.kind() == ErrorKind::NotFound => Response::NotFound,
                Err(e) => Response::Err(e.to_string()),
            }
        }
        Request::BsWrite { node_id, bytes } => {
            let mut s = server.lock().unwrap();
            match s.write(node_id, &bytes) {
                Ok(()) => Response::Ack,
                Err(e) if e.kind() == ErrorKind::ImmutableConflict => Response::ImmutableConflict,
                Err(e) => Response::Err(e.to_string()),
            }
        }
        Request::BsDelete { node_id } => {
            let mut s = server.lock().unwrap();
            match s.delete(node_id) {
                Ok(()) => Response::Ack,
                Err(e) => Response::Err(e.to_string()),
            }
        }
        Request::BsListLocal => Response::NodeIds(server.lock().unwrap().list_local()),
        _ => Response::Err("unsupported opcode for a block server".to_string()),
    }
}

fn dispatch_manager(req: Request, server: &ManagerServer) -> Response {
    match req {
        Request::Ping => Response::Pong,
        Request::MsAllocate { count } => match server.allocate_ids(count) {
            Ok(ids) => Response::Ids(ids),
            Err(e) => Response::Err(e.to_string()),
        },
        Request::MsResolve { node_id } => match server.resolve(node_id) {
            Ok((replicas, version)) => Response::Resolved { replicas, version },
            Err(e) if e.kind() == ErrorKind::NotFound => Response::NotFound,
            Err(e) => Response::Err(e.to_string()),
        },
        Request::MsAssign { node_id, target } => match server.assign(node_id, target) {
            Ok(()) => Response::Ack,
            Err(e) => Response::Err(e.to_string()),
        },
        Request::MsHeartbeat { block_server, status } => {
            server.heartbeat(block_server, status);
            Response::Ack
        }
        _ => Response::Err("unsupported opcode for a manager server".to_string()),
    }
}

fn dispatch_root(req: Request, server: &RootServer) -> Response {
    match req {
        Request::Ping => Response::Pong,
        Request::RsBegin { path } => match server.begin_transaction(&path) {
            Ok(TxHandle { base_root, .. }) => Response::Root(base_root),
            Err(e) if e.kind() == ErrorKind::NotFound => Response::NotFound,
            Err(e) => Response::Err(e.to_string()),
        },
        Request::RsRoot { path } => match server.current_root(&path) {
            Ok(root) => Response::Root(root),
            Err(e) if e.kind() == ErrorKind::NotFound => Response::NotFound,
            Err(e) => Response::Err(e.to_string()),
        },
        Request::RsCommit { path, base_root, proposed_root, touched_summary } => {
            let touched = match rmp_serde::from_slice(&touched_summary) {
                Ok(t) => t,
                Err(e) => return Response::Err(format!("malformed touched summary: {e}")),
            };
            let tx = TxHandle { base_root, base_commit_id: None };
            match server.commit(&path, tx, proposed_root, touched) {
                Ok(CommitOutcome::Committed { new_root, .. }) => Response::CommitOk(new_root),
                Ok(CommitOutcome::Fault(CommitFaultKind::MergeRequired)) => {
                    match server.current_root(&path) {
                        Ok(current) => Response::MergeNeeded(current),
                        Err(e) => Response::Err(e.to_string()),
                    }
                }
                Ok(CommitOutcome::Fault(kind)) => Response::CommitFault(kind.into()),
                Err(e) => Response::Err(e.to_string()),
            }
        }
        Request::RsRollback { path, to_commit } => match server.rollback(&path, to_commit) {
            Ok(root) => Response::Root(root),
            Err(e) => match e.kind() {
                ErrorKind::CommitFault(kind) => Response::CommitFault(kind.into()),
                ErrorKind::NotFound => Response::NotFound,
                _ => Response::Err(e.to_string()),
            },
        },
        _ => Response::Err("unsupported opcode for a root server".to_string()),
    }
}

/// Drives one connection against a block server until the peer end closes.
pub fn run_block_server_loop(mut stream: impl Read + Write, secret: &[u8], server: &Mutex<BlockServer>) {
    run_loop(&mut stream, secret, |req| dispatch_block(req, server))
}

pub fn run_manager_loop(mut stream: impl Read + Write, secret: &[u8], server: &ManagerServer) {
    run_loop(&mut stream, secret, |req| dispatch_manager(req, server))
}

pub fn run_root_loop(mut stream: impl Read + Write, secret: &[u8], server: &RootServer) {
    run_loop(&mut stream, secret, |req| dispatch_root(req, server))
}

fn run_loop(stream: &mut (impl Read + Write), secret: &[u8], mut dispatch: impl FnMut(Request) -> Response) {
    loop {
        let req: Request = match read_message(stream, secret) {
            Ok(req) => req,
            Err(e) => {
                debug!(target: "mckoi", error = %e, "connection closed");
                return;
            }
        };
        let resp = dispatch(req);
        if let Err(e) = write_message(stream, secret, &resp) {
            warn!(target: "mckoi", error = %e, "failed to send response, dropping connection");
            return;
        }
    }
}
