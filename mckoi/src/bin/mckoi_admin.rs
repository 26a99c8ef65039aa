// `mckoi-admin` (spec §6.4, SPEC_FULL.md §6.4.1): starts a single role's
// daemon listening on a TCP socket speaking `mckoi_net::wire`, or issues a
// one-shot administrative request (`show-roots`, `rollback`) against an
// already-running root server. Exit codes follow spec §6.4 exactly.

use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::thread;

use clap::{Parser, Subcommand};
use mckoi_base::{Config, ErrorKind, Result};
use mckoi_manager::{ManagerServer, Quorum};
use mckoi_net::PathName;
use mckoi_root::RootServer;
use mckoi_store::BlockServer;
use mckoi::channel::{Channel, StreamChannel};
use tracing::info;

#[derive(Parser)]
#[command(name = "mckoi-admin")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs a block server daemon (spec §4.1).
    StartNode {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = "0.0.0.0:3500")]
        listen: String,
    },
    /// Runs the cluster directory service (spec §4.2).
    StartManager {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = "0.0.0.0:3600")]
        listen: String,
    },
    /// Runs a root server daemon bound to a single path (spec §4.3).
    StartRoot {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        path: String,
        #[arg(long, default_value = "0.0.0.0:3700")]
        listen: String,
    },
    /// Prints the current root id of one or more paths on a running root server.
    ShowRoots {
        #[arg(long)]
        root_address: String,
        #[arg(long)]
        network_password: String,
        #[arg(long = "path")]
        paths: Vec<String>,
    },
    /// Rewinds a path to an earlier commit (spec §4.3.5).
    Rollback {
        #[arg(long)]
        root_address: String,
        #[arg(long)]
        network_password: String,
        #[arg(long)]
        path: String,
        #[arg(long = "to")]
        to_commit: u64,
    },
}

fn exit_code_for(err: &mckoi_base::Error) -> ExitCode {
    match err.kind() {
        ErrorKind::Config => ExitCode::from(1),
        ErrorKind::Network => ExitCode::from(2),
        ErrorKind::FileSystem => ExitCode::from(2),
        ErrorKind::ImmutableConflict => ExitCode::from(3),
        _ => ExitCode::from(3),
    }
}

fn run() -> Result<()> {
    match Cli::parse().command {
        Command::StartNode { config, listen } => start_node(&config, &listen),
        Command::StartManager { config, listen } => start_manager(&config, &listen),
        Command::StartRoot { config, path, listen } => start_root(&config, &path, &listen),
        Command::ShowRoots { root_address, network_password, paths } => {
            show_roots(&root_address, network_password.as_bytes(), &paths)
        }
        Command::Rollback { root_address, network_password, path, to_commit } => {
            rollback(&root_address, network_password.as_bytes(), &path, to_commit)
        }
    }
}

fn start_node(config_path: &PathBuf, listen: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let node_config = mckoi::config::NodeConfig::from_config(&config)?;
    let server = Arc::new(Mutex::new(BlockServer::open(&node_config.node_directory)?));
    info!(target: "mckoi", listen, dir = %node_config.node_directory, "block server listening");
    serve_forever(listen, node_config.network_password, move |stream, secret| {
        mckoi::wire_server::run_block_server_loop(stream, &secret, &server)
    })
}

fn start_manager(config_path: &PathBuf, listen: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let node_config = mckoi::config::NodeConfig::from_config(&config)?;
    let server = Arc::new(ManagerServer::open(&node_config.node_directory, Quorum::single())?);
    info!(target: "mckoi", listen, "manager server listening");
    serve_forever(listen, node_config.network_password, move |stream, secret| {
        mckoi::wire_server::run_manager_loop(stream, &secret, &server)
    })
}

/// Where `start_root` stakes its one-time bootstrap marker for `path`,
/// under the node's data directory.
fn root_bootstrap_marker(node_directory: &str, path: &str) -> PathBuf {
    let sanitized: String = path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    PathBuf::from(node_directory).join("root-paths").join(format!("{sanitized}.bootstrapped"))
}

fn start_root(config_path: &PathBuf, path: &str, listen: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let node_config = mckoi::config::NodeConfig::from_config(&config)?;

    // SPEC_FULL.md §6.3 requires a root server to persist `current_root`
    // transitionally (write-new, fsync, atomic-rename) and append every
    // accepted commit to a per-path log, so a restart resumes exactly
    // where it left off. That persistence layer isn't built here yet
    // (see DESIGN.md) — `RootServer`'s state lives only in the process's
    // memory, bootstrapped fresh every time `ensure_path` runs. Rather
    // than silently re-bootstrapping a path that already has committed
    // history on every restart and throwing that history away without a
    // trace, the first `start-root` for a path stakes a marker on disk;
    // any later `start-root` for the same path refuses to run instead of
    // quietly starting over from an empty tree.
    let marker = root_bootstrap_marker(&node_config.node_directory, path);
    if marker.exists() {
        return Err(mckoi_base::err_kind(
            ErrorKind::Config,
            format!(
                "path {path} was already bootstrapped by a prior start-root and this build has no \
                 durable root-server persistence (SPEC_FULL.md §6.3) to resume its history from; \
                 starting again would silently discard every commit made since. Remove {} only if \
                 losing that history is intentional.",
                marker.display(),
            ),
        ));
    }
    if let Some(parent) = marker.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&marker, b"")?;

    let server = Arc::new(RootServer::with_config(
        mckoi_root::DEFAULT_HISTORY_DEPTH,
        node_config.root_server_transaction_cache_bytes,
    ));
    let empty_root = {
        struct NoBlocksYet;
        impl mckoi_tree::BlockSource for NoBlocksYet {
            fn allocate_ids(&self, _count: u32) -> Result<Vec<mckoi_net::NodeId>> {
                Ok(Vec::new())
            }
            fn read_node(&self, id: mckoi_net::NodeId) -> Result<mckoi_store::Node> {
                Err(mckoi_base::err_kind(ErrorKind::NotFound, format!("{id} unknown to a fresh root")))
            }
            fn write_node(&self, _id: mckoi_net::NodeId, _node: &mckoi_store::Node) -> Result<()> {
                Ok(())
            }
            fn release(&self, _id: mckoi_net::NodeId) -> Result<()> {
                Ok(())
            }
            fn list_known_ids(&self) -> Result<Vec<mckoi_net::NodeId>> {
                Ok(Vec::new())
            }
        }
        mckoi_tree::empty_index_root(&NoBlocksYet)?
    };
    server.ensure_path(&PathName::from(path), empty_root);
    info!(target: "mckoi", listen, path, "root server listening");
    serve_forever(listen, node_config.network_password, move |stream, secret| {
        mckoi::wire_server::run_root_loop(stream, &secret, &server)
    })
}

fn serve_forever(
    listen: &str,
    secret: Vec<u8>,
    handler: impl Fn(TcpStream, Vec<u8>) + Send + Sync + Clone + 'static,
) -> Result<()> {
    let listener = TcpListener::bind(listen)?;
    for stream in listener.incoming() {
        let stream = stream?;
        let handler = handler.clone();
        let secret = secret.clone();
        thread::spawn(move || handler(stream, secret));
    }
    Ok(())
}

fn show_roots(root_address: &str, secret: &[u8], paths: &[String]) -> Result<()> {
    let stream = TcpStream::connect(root_address)?;
    let channel = StreamChannel::new(stream, secret.to_vec());
    for path in paths {
        match channel.call(mckoi_net::Request::RsRoot { path: PathName::from(path.as_str()) })? {
            mckoi_net::Response::Root(root) => println!("{path}\t{root}"),
            mckoi_net::Response::NotFound => println!("{path}\t<no such path>"),
            other => return Err(mckoi_base::err_kind(ErrorKind::Network, format!("unexpected reply {other:?}"))),
        }
    }
    Ok(())
}

fn rollback(root_address: &str, secret: &[u8], path: &str, to_commit: u64) -> Result<()> {
    let stream = TcpStream::connect(root_address)?;
    let channel = StreamChannel::new(stream, secret.to_vec());
    match channel.call(mckoi_net::Request::RsRollback { path: PathName::from(path), to_commit })? {
        mckoi_net::Response::Root(root) => {
            println!("{path} rolled back to {root}");
            Ok(())
        }
        mckoi_net::Response::CommitFault(kind) => {
            Err(mckoi_base::err_kind(ErrorKind::CommitFault(kind.into()), "rollback rejected"))
        }
        mckoi_net::Response::NotFound => Err(mckoi_base::err_kind(ErrorKind::NotFound, format!("no such path {path}"))),
        other => Err(mckoi_base::err_kind(ErrorKind::Network, format!("unexpected reply {other:?}"))),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mckoi-admin: {e}");
            exit_code_for(&e)
        }
    }
}
