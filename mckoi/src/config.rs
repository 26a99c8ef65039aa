// Typed views over `mckoi_base::Config` for each role (spec §6.1,
// SPEC_FULL.md §6.1.1). Each constructor pulls its recognized keys out of
// a loaded `Config` and applies the byte-size / duration grammars, so
// every other module deals in bytes and milliseconds, never raw strings.

use mckoi_base::{err_kind, Config, ErrorKind, Result};

const DEFAULT_BUCKET_COUNT: u32 = 64;
const DEFAULT_TRANSACTION_CACHE_BYTES: u64 = 14 * 1024 * 1024;
const DEFAULT_CONFIGCHECK_SECS: u64 = 120;

pub struct NodeConfig {
    pub network_password: Vec<u8>,
    pub node_directory: String,
    pub log_level: String,
    pub root_server_transaction_cache_bytes: u64,
}

impl NodeConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        let network_password = config.require_str("network_password")?.as_bytes().to_vec();
        if network_password.is_empty() {
            return Err(err_kind(ErrorKind::Config, "network_password must not be empty"));
        }
        let node_directory = config.require_str("node_directory")?.to_string();
        let log_level = config.get_str("log_level").unwrap_or("info").to_string();
        let root_server_transaction_cache_bytes =
            config.get_bytes("root_server_transaction_cache", DEFAULT_TRANSACTION_CACHE_BYTES)?;
        Ok(NodeConfig {
            network_password,
            node_directory,
            log_level,
            root_server_transaction_cache_bytes,
        })
    }
}

pub struct NetworkConfig {
    pub connect_whitelist: Option<Vec<String>>,
    pub network_nodelist: Vec<String>,
    pub configcheck_timeout_secs: u64,
}

impl NetworkConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        let connect_whitelist = config.get_list("connect_whitelist", true)?;
        // `network_nodelist=*` is explicitly rejected (scenario S6): a
        // cluster member list must always enumerate its peers.
        let network_nodelist = config.get_list("network_nodelist", false)?.unwrap_or_default();
        let configcheck_timeout_secs =
            config.get_duration_ms("configcheck_timeout", DEFAULT_CONFIGCHECK_SECS * 1000)? / 1000;
        Ok(NetworkConfig { connect_whitelist, network_nodelist, configcheck_timeout_secs })
    }
}

pub struct ClientConfig {
    pub manager_address: Vec<String>,
    pub network_password: Vec<u8>,
    pub transaction_cache_bytes: u64,
    pub global_cache_bytes: u64,
}

impl ClientConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        let manager_address = config
            .get_list("manager_address", false)?
            .ok_or_else(|| err_kind(ErrorKind::Config, "missing required key `manager_address`"))?;
        let network_password = config.require_str("network_password")?.as_bytes().to_vec();
        let transaction_cache_bytes = config.get_bytes(
            "transaction_cache_size",
            mckoi_root::DEFAULT_BUDGET_BYTES,
        )?;
        let global_cache_bytes = config.get_bytes(
            "global_cache_size",
            mckoi_tree::DEFAULT_NODE_CACHE_BUDGET_BYTES,
        )?;
        Ok(ClientConfig {
            manager_address,
            network_password,
            transaction_cache_bytes,
            global_cache_bytes,
        })
    }
}

pub fn default_bucket_count() -> u32 {
    DEFAULT_BUCKET_COUNT
}
